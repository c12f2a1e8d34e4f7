//! keymesh wire protocol: key handshake and multiplexed RPC between nodes.
//!
//! Nodes exchange DER public keys as the first message on a fresh channel,
//! derive each other's address from the key, and then exchange MessagePack
//! RPC envelopes over the same channel.
//!
//! ## Architecture
//!
//! - **Channel**: duplex, message-framed transport handle (WebSocket or in-memory)
//! - **Envelope**: request / success / failure messages
//! - **Peer**: one identified remote node; correlates calls with responses
//! - **MethodRegistry**: local handlers served to remote peers
//! - **Node**: owns the identity, runs handshakes and tracks peers

pub mod channel;
pub mod error;
pub mod logger;
pub mod message;
pub mod methods;
pub mod node;
pub mod peer;
pub mod registry;
pub mod transport;

pub use channel::{Channel, ChannelSender};
pub use error::{CallError, HandlerError, WireError};
pub use logger::NodeLogger;
pub use message::Envelope;
pub use methods::{MethodHandler, MethodRegistry};
pub use node::Node;
pub use peer::Peer;
pub use registry::PeerRegistry;

/// Dynamic MessagePack value carried as params, results and error payloads.
pub use rmpv::Value;
