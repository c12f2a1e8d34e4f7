//! Node: owns the identity, runs key handshakes and tracks peers.
//!
//! Every new [`Channel`], inbound or outbound, goes through the same
//! symmetric handshake:
//!
//! 1. Send our DER public key as the first message.
//! 2. Wait for exactly one message: the remote's DER public key.
//! 3. Derive the remote address from it.
//! 4. Wrap the channel in a [`Peer`] and register it.
//! 5. Optionally ping the new peer and log the round trip.
//!
//! A channel that closes before step 2 is dropped without creating a peer.
//! Once registered, the peer's receive loop runs on its own task; when it
//! ends the peer is removed and its pending calls fail in the same step.
//!
//! The remote is trusted to own the key it sent: no proof of possession is
//! requested.

use crate::channel::Channel;
use crate::error::{CallError, WireError};
use crate::logger::NodeLogger;
use crate::methods::{MethodRegistry, PING};
use crate::peer::Peer;
use crate::registry::PeerRegistry;
use crate::transport;

use futures::future::join_all;
use keymesh_types::identity::decode_public_key;
use keymesh_types::{derive_address, Address, Identity, NodeConfig};
use rmpv::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A running keymesh node.
pub struct Node {
    identity: Identity,
    methods: Arc<MethodRegistry>,
    peers: PeerRegistry,
    logger: NodeLogger,
    ping_on_connect: bool,
}

impl Node {
    /// Build a node. The method table is fixed from here on.
    pub fn new(identity: Identity, methods: MethodRegistry, logger: NodeLogger) -> Self {
        if methods.is_empty() {
            logger.warn(format_args!("serving no methods; every inbound call will fail"));
        }
        Self {
            identity,
            methods: Arc::new(methods),
            peers: PeerRegistry::new(),
            logger,
            ping_on_connect: true,
        }
    }

    /// Build a node with the logger and liveness settings from `config`.
    pub fn from_config(identity: Identity, methods: MethodRegistry, config: &NodeConfig) -> Self {
        let logger = NodeLogger::new(&identity.address(), config.log);
        Self::new(identity, methods, logger).with_ping_on_connect(config.ping_on_connect)
    }

    /// Whether to ping each new peer right after its handshake.
    pub fn with_ping_on_connect(mut self, enabled: bool) -> Self {
        self.ping_on_connect = enabled;
        self
    }

    /// This node's address, as its peers derive it.
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// DER public key sent during handshakes.
    pub fn public_key(&self) -> &[u8] {
        self.identity.public_key()
    }

    /// The logger injected at construction.
    pub fn logger(&self) -> &NodeLogger {
        &self.logger
    }

    /// First connected peer with this address.
    pub fn find_peer(&self, address: &Address) -> Option<Arc<Peer>> {
        self.peers.find_peer(address)
    }

    /// Snapshot of the connected peers, in connection order.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.all_peers()
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    /// Run the key handshake on `channel` and register the resulting peer.
    pub async fn add_connection(self: &Arc<Self>, channel: Channel) -> Result<Arc<Peer>, WireError> {
        let label = channel.label().to_string();
        let (sender, mut inbound) = channel.into_parts();

        if sender.send(self.identity.public_key().to_vec()).is_err() {
            return Err(WireError::HandshakeFailed(format!(
                "channel {label} closed before our key was sent"
            )));
        }

        let Some(remote_key) = inbound.recv().await else {
            self.logger
                .debug(format_args!("channel {label} closed during handshake"));
            sender.close();
            return Err(WireError::HandshakeFailed(format!(
                "channel {label} closed before the remote key arrived"
            )));
        };

        if let Err(e) = decode_public_key(&remote_key) {
            self.logger
                .warn(format_args!("rejecting {label}: bad public key: {e}"));
            sender.close();
            return Err(WireError::Identity(e));
        }
        let address = derive_address(&remote_key);

        let peer = Peer::new(address, sender, label.clone());
        self.peers.add_peer(Arc::clone(&peer));
        self.logger.info(format_args!(
            "added peer {} via {}",
            address.short_name(),
            label
        ));

        let node = Arc::clone(self);
        let reader = Arc::clone(&peer);
        let methods = Arc::clone(&self.methods);
        tokio::spawn(async move {
            Arc::clone(&reader).run(inbound, methods).await;
            node.drop_peer(&reader);
        });

        if self.ping_on_connect {
            let logger = self.logger.clone();
            let target = Arc::clone(&peer);
            tokio::spawn(async move {
                let started = Instant::now();
                match target.call(PING, vec![]).await {
                    Ok(time) => logger.info(format_args!(
                        "pong {} from {} in {:?}",
                        time,
                        target.address().short_name(),
                        started.elapsed()
                    )),
                    Err(e) => logger.warn(format_args!(
                        "ping to {} failed: {}",
                        target.address().short_name(),
                        e
                    )),
                }
            });
        }

        Ok(peer)
    }

    /// Remove a peer whose channel closed and fail its pending calls.
    fn drop_peer(&self, peer: &Arc<Peer>) {
        self.peers.remove_peer(peer);
        let failed = peer.fail_all();
        self.logger.info(format_args!(
            "peer {} disconnected ({} pending calls failed)",
            peer.address().short_name(),
            failed
        ));
    }

    /// Accept inbound WebSocket connections on `addr`.
    ///
    /// Returns the bound address and the accept task. The task ends with an
    /// error if the listener fails; it does not retry.
    pub async fn listen(
        self: &Arc<Self>,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), WireError>>), WireError> {
        let listener = transport::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        self.logger
            .info(format_args!("listening on ws://{local_addr}/"));

        let node = Arc::clone(self);
        let task = tokio::spawn(async move { node.accept_loop(listener).await });
        Ok((local_addr, task))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> Result<(), WireError> {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("keymesh: accept error: {}", e);
                    return Err(WireError::Io(e));
                }
            };
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                let result = match transport::upgrade(stream, remote).await {
                    Ok(channel) => node.add_connection(channel).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    debug!("keymesh: inbound connection from {} failed: {}", remote, e);
                }
            });
        }
    }

    /// Dial one peer over WebSocket and run the handshake.
    pub async fn dial(self: &Arc<Self>, url: &str) -> Result<Arc<Peer>, WireError> {
        let channel = transport::dial(url).await?;
        self.add_connection(channel).await
    }

    /// Call `method` on every connected peer concurrently.
    pub async fn broadcast(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Vec<(Address, Result<Value, CallError>)> {
        let peers = self.peers.all_peers();
        let calls = peers.iter().map(|peer| {
            let params = params.clone();
            async move { (peer.address(), peer.call(method, params).await) }
        });
        join_all(calls).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.identity.address())
            .field("peers", &self.peers.count())
            .field("methods", &self.methods)
            .finish()
    }
}
