//! WebSocket transport.
//!
//! Adapts `tokio-tungstenite` streams to [`Channel`]s. Every channel payload
//! travels as one binary WebSocket frame, so message boundaries come for free.
//! A pump task per connection moves frames between the socket and the
//! channel's queues until either side closes.

use crate::channel::{wait_for_shutdown, Channel, ChannelIo};
use crate::error::WireError;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

/// Bind a TCP listener for inbound WebSocket connections.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, WireError> {
    let listener = TcpListener::bind(addr).await?;
    info!("keymesh: listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Complete the server side of the WebSocket upgrade on an accepted stream.
pub async fn upgrade(stream: TcpStream, remote: SocketAddr) -> Result<Channel, WireError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    debug!("keymesh: accepted WebSocket connection from {}", remote);
    Ok(spawn_pump(ws, remote.to_string()))
}

/// Open an outbound WebSocket connection.
pub async fn dial(url: &str) -> Result<Channel, WireError> {
    info!("keymesh: dialing {}", url);
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    Ok(spawn_pump(ws, url.to_string()))
}

fn spawn_pump<S>(ws: WebSocketStream<S>, label: String) -> Channel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (channel, io) = Channel::new(label.clone());
    tokio::spawn(async move {
        pump(ws, io, &label).await;
        debug!("keymesh: channel {} closed", label);
    });
    channel
}

async fn pump<S>(ws: WebSocketStream<S>, io: ChannelIo, label: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ChannelIo {
        mut outbound,
        inbound,
        mut shutdown,
    } = io;
    let (mut ws_tx, mut ws_rx) = ws.split();
    let closed = wait_for_shutdown(&mut shutdown);
    tokio::pin!(closed);

    loop {
        tokio::select! {
            biased;
            out = outbound.recv() => match out {
                Some(bytes) => {
                    if let Err(e) = ws_tx.send(Message::Binary(bytes)).await {
                        debug!("keymesh: send to {} failed: {}", label, e);
                        break;
                    }
                }
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    if inbound.send(bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("keymesh: receive from {} failed: {}", label, e);
                    break;
                }
            },
            _ = &mut closed => {
                let _ = ws_tx.close().await;
                break;
            }
        }
    }
}
