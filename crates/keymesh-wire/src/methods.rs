//! Method registry: maps RPC method names to local handlers.
//!
//! The registry is filled before the [`Node`](crate::node::Node) is built and
//! is read-only afterwards. Inbound requests are resolved against it by exact
//! name.

use crate::error::HandlerError;
use crate::peer::Peer;
use async_trait::async_trait;
use rmpv::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A local method callable by remote peers.
#[async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    /// Run the method for `peer` with positional `params`.
    async fn handle(&self, peer: Arc<Peer>, params: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into a [`MethodHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Arc<Peer>, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, peer: Arc<Peer>, params: Vec<Value>) -> Result<Value, HandlerError> {
        (self.0)(peer, params).await
    }
}

/// Built-in liveness probe: replies with the local time in milliseconds since the Unix epoch.
pub struct Ping;

#[async_trait]
impl MethodHandler for Ping {
    async fn handle(&self, _peer: Arc<Peer>, _params: Vec<Value>) -> Result<Value, HandlerError> {
        Ok(Value::from(chrono::Utc::now().timestamp_millis()))
    }
}

/// Name of the built-in liveness method.
pub const PING: &str = "ping";

/// Name → handler table.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// An empty registry. Peers calling `ping` on a node built from it get "method not found".
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in methods (`ping`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PING, Ping);
        registry
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl MethodHandler) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register an async closure under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Arc<Peer>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(name, FnHandler(f))
    }

    /// Builder-style [`register_fn`](Self::register_fn).
    pub fn with_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<Peer>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_fn(name, f);
        self
    }

    /// Handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}
