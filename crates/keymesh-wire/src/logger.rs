//! Per-node logger.
//!
//! Each [`Node`](crate::node::Node) is handed its own [`NodeLogger`] at
//! construction. Lifecycle messages carry the node's short name so several
//! nodes in one process stay distinguishable, and a disabled logger emits
//! nothing without touching any process-wide state.

use keymesh_types::Address;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NodeLogger {
    name: String,
    enabled: bool,
}

impl NodeLogger {
    /// Logger for the node at `address`.
    pub fn new(address: &Address, enabled: bool) -> Self {
        Self {
            name: address.short_name(),
            enabled,
        }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self {
            name: String::new(),
            enabled: false,
        }
    }

    /// Whether this logger emits anything.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Short node name used as the log prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit an `info` event tagged with the node name.
    pub fn info(&self, message: fmt::Arguments<'_>) {
        if self.enabled {
            info!(node = %self.name, "{}", message);
        }
    }

    /// Emit a `debug` event tagged with the node name.
    pub fn debug(&self, message: fmt::Arguments<'_>) {
        if self.enabled {
            debug!(node = %self.name, "{}", message);
        }
    }

    /// Emit a `warn` event tagged with the node name.
    pub fn warn(&self, message: fmt::Arguments<'_>) {
        if self.enabled {
            warn!(node = %self.name, "{}", message);
        }
    }
}
