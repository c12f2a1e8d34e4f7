//! Command implementations.

pub mod id;
pub mod node;
