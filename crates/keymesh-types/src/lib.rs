//! Core types for keymesh.
//!
//! This crate defines the shared data structures used by the wire protocol and
//! the CLI: node identities, the addresses derived from them, node
//! configuration and the common error type. It contains no I/O.

pub mod config;
pub mod error;
pub mod identity;

pub use config::{NodeConfig, NodeMode};
pub use error::{KeymeshError, KeymeshResult};
pub use identity::{derive_address, Address, Identity};
