//! Node commands: run from config, listen, dial.
//!
//! Each command builds its own Tokio runtime and a node with a freshly
//! generated identity and the built-in methods.

use anyhow::{Context, Result};
use keymesh_types::config::{parse_bootstrap_url, DEFAULT_BOOTSTRAP_URL};
use keymesh_types::{Identity, NodeConfig, NodeMode};
use keymesh_wire::{MethodRegistry, Node, Peer, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Listen address used when neither `--addr` nor the config names one.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1337";

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Bare `keymesh`: listen or dial depending on the config.
pub fn cmd_run(config: NodeConfig) -> Result<()> {
    let mode = config.mode()?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let node = build_node(&config);
        match mode {
            NodeMode::Listen(addr) => serve(&node, addr).await,
            NodeMode::Dial(url) => {
                let peer = connect(&node, url.as_str()).await?;
                wait_for_close(&peer).await;
                Ok(())
            }
        }
    })
}

pub fn cmd_listen(config: NodeConfig, addr: Option<SocketAddr>) -> Result<()> {
    let addr = match addr.or(config.listen) {
        Some(addr) => addr,
        None => DEFAULT_LISTEN_ADDR.parse()?,
    };
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let node = build_node(&config);
        serve(&node, addr).await
    })
}

pub fn cmd_dial(
    config: NodeConfig,
    url: Option<String>,
    call: Option<String>,
    params: Vec<String>,
) -> Result<()> {
    let raw = url
        .or_else(|| config.bootstrap.clone())
        .unwrap_or_else(|| DEFAULT_BOOTSTRAP_URL.to_string());
    let url = parse_bootstrap_url(&raw)?;
    let params = params
        .iter()
        .map(|p| parse_param(p))
        .collect::<Result<Vec<Value>>>()?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let node = build_node(&config);
        let peer = connect(&node, url.as_str()).await?;
        let Some(method) = call else {
            wait_for_close(&peer).await;
            return Ok(());
        };

        let result = peer.call(&method, params).await;
        peer.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, wait_for_close(&peer)).await;

        let value = result.with_context(|| format!("Call to `{method}` failed"))?;
        println!("{}", render_value(value));
        Ok(())
    })
}

fn build_node(config: &NodeConfig) -> Arc<Node> {
    let methods = MethodRegistry::with_builtins();
    info!(count = methods.len(), names = ?methods.names(), "Serving methods");
    let node = Node::from_config(Identity::generate(), methods, config);
    info!(address = %node.address(), "Node identity generated");
    Arc::new(node)
}

async fn serve(node: &Arc<Node>, addr: SocketAddr) -> Result<()> {
    let (local, accept) = node
        .listen(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    println!("{} listening on ws://{local}/", node.address().short_name());

    tokio::select! {
        joined = accept => {
            joined.context("Accept task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(peers = node.peer_count(), "Interrupted, shutting down");
            for peer in node.peers() {
                info!(
                    peer = %peer.address().short_name(),
                    via = peer.label(),
                    since = %peer.connected_at().to_rfc3339(),
                    "Closing peer"
                );
                peer.close();
            }
        }
    }
    Ok(())
}

async fn connect(node: &Arc<Node>, url: &str) -> Result<Arc<Peer>> {
    let peer = node
        .dial(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    println!(
        "{} connected to {} via {}",
        node.address().short_name(),
        peer.address().short_name(),
        peer.label()
    );
    Ok(peer)
}

/// Wait until the peer's channel closes or Ctrl-C is pressed.
async fn wait_for_close(peer: &Peer) {
    tokio::select! {
        _ = peer.closed() => {
            info!(peer = %peer.address().short_name(), "Connection closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing connection");
            peer.close();
        }
    }
}

/// Parse a `--param` value as JSON, falling back to a plain string.
fn parse_param(raw: &str) -> Result<Value> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => rmpv::ext::to_value(json)
            .with_context(|| format!("Cannot encode parameter `{raw}`")),
        Err(_) => Ok(Value::from(raw)),
    }
}

/// Render a result as pretty JSON when it has a JSON form, else in
/// MessagePack notation (binary and extension values).
fn render_value(value: Value) -> String {
    match rmpv::ext::from_value::<serde_json::Value>(value.clone()) {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}
