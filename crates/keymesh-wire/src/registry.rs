//! Peer registry: the set of peers a node currently holds.
//!
//! One entry per established channel. Two channels from the same key are two
//! entries with equal addresses, so removal goes by identity of the `Arc`, not
//! by address. Lookup by address is a linear scan, which is fine for the small
//! peer sets a single node keeps.

use crate::peer::Peer;
use keymesh_types::Address;
use std::sync::{Arc, RwLock};

/// Thread-safe set of connected peers.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<Vec<Arc<Peer>>>>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer after a successful handshake.
    pub fn add_peer(&self, peer: Arc<Peer>) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.push(peer);
    }

    /// Remove exactly this peer. Returns false if it was not registered.
    pub fn remove_peer(&self, peer: &Arc<Peer>) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let before = peers.len();
        peers.retain(|p| !Arc::ptr_eq(p, peer));
        peers.len() != before
    }

    /// First peer whose address matches exactly.
    pub fn find_peer(&self, address: &Address) -> Option<Arc<Peer>> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.iter().find(|p| p.has_address(address)).cloned()
    }

    /// Snapshot of all peers, in connection order.
    pub fn all_peers(&self) -> Vec<Arc<Peer>> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.clone()
    }

    /// Number of registered peers.
    pub fn count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}
