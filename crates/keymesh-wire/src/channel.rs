//! Duplex message channel between two nodes.
//!
//! A [`Channel`] is the only thing the protocol layer knows about the
//! transport. The core side sends opaque payloads through a cloneable
//! [`ChannelSender`] and reads inbound payloads one message at a time; the end
//! of the inbound stream is the close notification and is observed exactly
//! once. The transport side ([`ChannelIo`]) pumps bytes between those queues
//! and the real connection, preserving message boundaries.

use crate::error::WireError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Inbound payloads buffered per channel before the transport applies backpressure.
pub const INBOUND_CAPACITY: usize = 256;

/// Core-side handle of a duplex, message-framed connection.
pub struct Channel {
    sender: ChannelSender,
    inbound: mpsc::Receiver<Vec<u8>>,
    label: String,
}

/// Cloneable send/close half of a [`Channel`].
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Transport-side queues of a [`Channel`].
///
/// Dropping `inbound` ends the core's inbound stream, which the core treats
/// as the channel having closed.
pub struct ChannelIo {
    /// Payloads the core wants delivered to the remote side.
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Payloads received from the remote side.
    pub inbound: mpsc::Sender<Vec<u8>>,
    /// Flips to `true` when the core asks for shutdown.
    pub shutdown: watch::Receiver<bool>,
}

impl Channel {
    /// Create a channel and the transport-side queues that drive it.
    pub fn new(label: impl Into<String>) -> (Self, ChannelIo) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let channel = Self {
            sender: ChannelSender {
                outbound: outbound_tx,
                shutdown: Arc::new(shutdown_tx),
            },
            inbound: inbound_rx,
            label: label.into(),
        };
        let io = ChannelIo {
            outbound: outbound_rx,
            inbound: inbound_tx,
            shutdown: shutdown_rx,
        };
        (channel, io)
    }

    /// Two channels connected back to back in memory.
    ///
    /// Closing either end closes both. Must be called inside a tokio runtime.
    pub fn pair() -> (Self, Self) {
        let (a, a_io) = Channel::new("memory-a");
        let (b, b_io) = Channel::new("memory-b");

        tokio::spawn(async move {
            let ChannelIo {
                outbound: mut a_out,
                inbound: a_in,
                shutdown: mut a_shutdown,
            } = a_io;
            let ChannelIo {
                outbound: mut b_out,
                inbound: b_in,
                shutdown: mut b_shutdown,
            } = b_io;

            let a_closed = wait_for_shutdown(&mut a_shutdown);
            let b_closed = wait_for_shutdown(&mut b_shutdown);
            tokio::pin!(a_closed, b_closed);

            loop {
                tokio::select! {
                    biased;
                    Some(bytes) = a_out.recv() => {
                        if b_in.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(bytes) = b_out.recv() => {
                        if a_in.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    _ = &mut a_closed => break,
                    _ = &mut b_closed => break,
                    else => break,
                }
            }
            // a_in and b_in drop here, ending both inbound streams.
        });

        (a, b)
    }

    /// Human-readable description of the remote end (socket address, URL, ...).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// A cloneable handle to the send half.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Send one payload. See [`ChannelSender::send`].
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        self.sender.send(bytes)
    }

    /// Next inbound payload, or `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Request shutdown of the connection. Idempotent.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Split into the send half and the inbound stream.
    pub fn into_parts(self) -> (ChannelSender, mpsc::Receiver<Vec<u8>>) {
        (self.sender, self.inbound)
    }
}

impl ChannelSender {
    /// Enqueue a payload for delivery. Fire-and-forget: success means queued,
    /// not delivered.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        self.outbound
            .send(bytes)
            .map_err(|_| WireError::ConnectionClosed)
    }

    /// Request shutdown of the underlying connection. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether shutdown was requested or the transport side has gone away.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.outbound.is_closed()
    }
}

/// Resolves once shutdown was requested or every core-side handle was dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
