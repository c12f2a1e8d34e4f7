//! Node configuration.
//!
//! A node either listens for inbound connections or dials a single bootstrap
//! peer, never both. Everything else has a sensible default so an empty
//! config file is valid.

use crate::error::{KeymeshError, KeymeshResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Bootstrap URL used when neither `listen` nor `bootstrap` is configured.
pub const DEFAULT_BOOTSTRAP_URL: &str = "ws://localhost:1337/";

/// Top-level node configuration (the TOML file maps onto this struct).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to accept inbound WebSocket connections on (server mode).
    pub listen: Option<SocketAddr>,
    /// WebSocket URL of the single peer to dial (client mode).
    pub bootstrap: Option<String>,
    /// Enable the per-node logger.
    pub log: bool,
    /// Ping every new peer right after the handshake and log the round trip.
    pub ping_on_connect: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: None,
            bootstrap: None,
            log: true,
            ping_on_connect: true,
        }
    }
}

/// How a node obtains its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMode {
    /// Accept inbound channels on this address.
    Listen(SocketAddr),
    /// Open one outbound channel to this URL.
    Dial(url::Url),
}

impl NodeConfig {
    /// Resolve the connection mode, validating the listen/bootstrap exclusivity.
    pub fn mode(&self) -> KeymeshResult<NodeMode> {
        match (self.listen, self.bootstrap.as_deref()) {
            (Some(_), Some(_)) => Err(KeymeshError::Config(
                "`listen` and `bootstrap` are mutually exclusive".to_string(),
            )),
            (Some(addr), None) => Ok(NodeMode::Listen(addr)),
            (None, Some(url)) => parse_bootstrap_url(url).map(NodeMode::Dial),
            (None, None) => parse_bootstrap_url(DEFAULT_BOOTSTRAP_URL).map(NodeMode::Dial),
        }
    }
}

/// Parse and validate a bootstrap URL; only `ws` and `wss` are accepted.
pub fn parse_bootstrap_url(raw: &str) -> KeymeshResult<url::Url> {
    let url = url::Url::parse(raw)
        .map_err(|e| KeymeshError::Config(format!("invalid bootstrap URL '{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(KeymeshError::Config(format!(
            "bootstrap URL must use ws:// or wss://, got '{other}://'"
        ))),
    }
}
