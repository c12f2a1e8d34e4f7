//! Peer: one identified remote node and its in-flight RPC state.
//!
//! A [`Peer`] exists once the key handshake on a [`Channel`](crate::Channel)
//! has succeeded. It owns the send half of the channel, allocates request ids
//! and keeps a table of pending calls keyed by id. Its receive loop decodes
//! each inbound envelope and either:
//!
//! - dispatches a request to the [`MethodRegistry`] on a separate task, so a
//!   slow handler never stalls the loop, or
//! - completes the matching pending call with the response.
//!
//! A message that is valid MessagePack but not a valid envelope is still
//! answered when its `id` can be read: a bad request gets a failure reply and
//! a bad response fails the matching call.
//!
//! When the channel closes every pending call fails with
//! [`CallError::ConnectionClosed`]; nothing is left waiting forever.

use crate::channel::{wait_for_shutdown, ChannelSender};
use crate::error::CallError;
use crate::message::*;
use crate::methods::MethodRegistry;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use keymesh_types::Address;
use rmpv::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

type Completion = oneshot::Sender<Result<Value, CallError>>;

/// Pending calls plus the closed flag, guarded together so a call can never
/// register after the peer has failed everything.
#[derive(Default)]
struct PendingCalls {
    closed: bool,
    waiters: HashMap<RequestId, Completion>,
}

/// Local proxy for a remote node.
pub struct Peer {
    address: Address,
    label: String,
    connected_at: DateTime<Utc>,
    sender: ChannelSender,
    next_id: AtomicU64,
    pending: Mutex<PendingCalls>,
    closed: watch::Sender<bool>,
}

impl Peer {
    pub(crate) fn new(
        address: Address,
        sender: ChannelSender,
        label: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            label: label.into(),
            connected_at: Utc::now(),
            sender,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingCalls::default()),
            closed: watch::Sender::new(false),
        })
    }

    /// Address derived from the remote's public key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether this peer was derived from the key hashing to `address`.
    pub fn has_address(&self, address: &Address) -> bool {
        self.address == *address
    }

    /// Transport description of the remote end.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When the handshake completed.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().waiters.len()
    }

    /// Whether the channel has closed and the peer stopped accepting calls.
    pub fn is_closed(&self) -> bool {
        self.lock_pending().closed
    }

    /// Resolves once the peer is closed and every pending call has failed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        wait_for_shutdown(&mut rx).await;
    }

    /// Ask the transport to close the channel. Pending calls fail once the
    /// close is observed by the receive loop.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Call `method` on the remote node and wait for its response.
    ///
    /// There is no timeout here; wrap the future in `tokio::time::timeout`
    /// for a bounded wait. Dropping the future forgets the pending entry.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_envelope(&Envelope::Request {
            id,
            method: method.to_string(),
            params,
        })
        .map_err(|e| CallError::Encode(e.to_string()))?;

        let rx = {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(CallError::ConnectionClosed);
            }
            let (tx, rx) = oneshot::channel();
            pending.waiters.insert(id, tx);
            rx
        };
        let _guard = PendingGuard { peer: self, id };

        if self.sender.send(bytes).is_err() {
            self.complete(id, Err(CallError::ConnectionClosed));
        }

        rx.await.unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Deliver the outcome for `id`. Returns false for unknown (stale or
    /// duplicate) ids, which are dropped.
    fn complete(&self, id: RequestId, outcome: Result<Value, CallError>) -> bool {
        let waiter = self.lock_pending().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(
                    "keymesh: discarding response {} from {} with no pending call",
                    id,
                    self.address.short_name()
                );
                false
            }
        }
    }

    /// Mark the peer closed and fail every pending call. Returns how many were failed.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<Completion> = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            pending.waiters.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(CallError::ConnectionClosed));
        }
        self.closed.send_replace(true);
        count
    }

    /// Process one inbound channel message.
    pub(crate) fn handle_message(self: &Arc<Self>, bytes: &[u8], methods: &Arc<MethodRegistry>) {
        let envelope = match decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reject_malformed(bytes, &e.to_string());
                return;
            }
        };

        match envelope {
            Envelope::Request { id, method, params } => {
                let peer = Arc::clone(self);
                let methods = Arc::clone(methods);
                tokio::spawn(async move {
                    let reply = dispatch_request(&peer, &methods, id, &method, params).await;
                    peer.send_envelope(&reply);
                });
            }
            Envelope::Success { id, result } => {
                self.complete(id, Ok(result));
            }
            Envelope::Failure { id, error } => {
                self.complete(id, Err(CallError::Remote(error)));
            }
        }
    }

    /// Answer whatever is waiting on an envelope that failed to decode.
    ///
    /// A bad request gets a [`BAD_REQUEST`] failure; a bad reply fails the
    /// matching call. Messages without a readable id are dropped.
    fn reject_malformed(&self, bytes: &[u8], reason: &str) {
        match recover_header(bytes) {
            Some(EnvelopeHeader {
                id,
                is_request: true,
            }) => {
                warn!(
                    "keymesh: rejecting malformed request {} from {}: {}",
                    id,
                    self.address.short_name(),
                    reason
                );
                self.send_envelope(&Envelope::Failure {
                    id,
                    error: error_value(BAD_REQUEST, format!("malformed request: {reason}")),
                });
            }
            Some(EnvelopeHeader { id, .. }) => {
                warn!(
                    "keymesh: malformed response {} from {}: {}",
                    id,
                    self.address.short_name(),
                    reason
                );
                self.complete(id, Err(CallError::MalformedResponse(reason.to_string())));
            }
            None => {
                warn!(
                    "keymesh: dropping malformed envelope from {}: {}",
                    self.address.short_name(),
                    reason
                );
            }
        }
    }

    /// Receive loop: runs until the channel's inbound stream ends.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        methods: Arc<MethodRegistry>,
    ) {
        while let Some(bytes) = inbound.recv().await {
            self.handle_message(&bytes, &methods);
        }
    }

    fn send_envelope(&self, envelope: &Envelope) {
        let bytes = match encode_envelope(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("keymesh: failed to encode reply {}: {}", envelope.id(), e);
                return;
            }
        };
        if self.sender.send(bytes).is_err() {
            debug!(
                "keymesh: reply {} to {} dropped, channel closed",
                envelope.id(),
                self.address.short_name()
            );
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("label", &self.label)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Removes the pending entry if the caller stops waiting early.
struct PendingGuard<'a> {
    peer: &'a Peer,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.peer.lock_pending().waiters.remove(&self.id);
    }
}

/// Run one inbound request against the registry and build the reply.
async fn dispatch_request(
    peer: &Arc<Peer>,
    methods: &MethodRegistry,
    id: RequestId,
    method: &str,
    params: Vec<Value>,
) -> Envelope {
    let Some(handler) = methods.get(method) else {
        debug!(
            "keymesh: {} called unknown method '{}'",
            peer.address.short_name(),
            method
        );
        return Envelope::Failure {
            id,
            error: error_value(METHOD_NOT_FOUND, format!("method not found: {method}")),
        };
    };

    match AssertUnwindSafe(handler.handle(Arc::clone(peer), params))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => Envelope::Success { id, result },
        Ok(Err(e)) => Envelope::Failure {
            id,
            error: e.to_value(),
        },
        Err(_) => {
            warn!("keymesh: handler for '{}' panicked", method);
            Envelope::Failure {
                id,
                error: error_value(HANDLER_FAILED, format!("handler for '{method}' panicked")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::error::HandlerError;
    use crate::methods::PING;
    use keymesh_types::derive_address;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// A peer wired to one end of an in-memory pair; the other end is returned raw.
    fn spawn_peer(
        methods: MethodRegistry,
    ) -> (Arc<Peer>, Channel, tokio::task::JoinHandle<usize>) {
        let (local, remote) = Channel::pair();
        let (sender, inbound) = local.into_parts();
        let peer = Peer::new(derive_address(b"remote"), sender, "memory");
        let methods = Arc::new(methods);
        let task = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move {
                Arc::clone(&peer).run(inbound, methods).await;
                peer.fail_all()
            }
        });
        (peer, remote, task)
    }

    async fn next_envelope(channel: &mut Channel) -> Envelope {
        let bytes = timeout(WAIT, channel.recv()).await.unwrap().unwrap();
        decode_envelope(&bytes).unwrap()
    }

    fn send(channel: &Channel, envelope: Envelope) {
        channel.send(encode_envelope(&envelope).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());

        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("add", vec![Value::from(2), Value::from(3)]).await }
        });

        match next_envelope(&mut remote).await {
            Envelope::Request { id, method, params } => {
                assert_eq!(id, 1);
                assert_eq!(method, "add");
                assert_eq!(params, vec![Value::from(2), Value::from(3)]);
                send(&remote, Envelope::Success { id, result: Value::from(5) });
            }
            other => panic!("Expected Request, got {other:?}"),
        }

        assert_eq!(timeout(WAIT, call).await.unwrap().unwrap(), Ok(Value::from(5)));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_increase_from_one() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        for _ in 0..3 {
            let peer = Arc::clone(&peer);
            tokio::spawn(async move { peer.call("noop", vec![]).await });
        }
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(next_envelope(&mut remote).await.id());
        }
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(peer.pending_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_calls_never_swap_results() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let peer = Arc::clone(&peer);
                tokio::spawn(async move { (i, peer.call("square", vec![Value::from(i)]).await) })
            })
            .collect();

        let mut requests = Vec::new();
        for _ in 0..8 {
            match next_envelope(&mut remote).await {
                Envelope::Request { id, params, .. } => requests.push((id, params[0].clone())),
                other => panic!("Expected Request, got {other:?}"),
            }
        }
        // Answer in reverse arrival order.
        for (id, param) in requests.into_iter().rev() {
            let n = param.as_i64().unwrap();
            send(&remote, Envelope::Success { id, result: Value::from(n * n) });
        }

        for call in calls {
            let (i, outcome) = timeout(WAIT, call).await.unwrap().unwrap();
            assert_eq!(outcome, Ok(Value::from(i * i)));
        }
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_rejects_call() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("boom", vec![]).await }
        });
        let id = next_envelope(&mut remote).await.id();
        send(
            &remote,
            Envelope::Failure {
                id,
                error: error_value(HANDLER_FAILED, "exploded"),
            },
        );
        let err = timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.remote_code(), Some(500));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_responses_discarded() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("once", vec![]).await }
        });
        let id = next_envelope(&mut remote).await.id();

        // Unknown id first, then the real answer twice.
        send(&remote, Envelope::Success { id: 999, result: Value::from("stale") });
        send(&remote, Envelope::Success { id, result: Value::from("first") });
        send(&remote, Envelope::Failure { id, error: Value::from("second") });

        assert_eq!(timeout(WAIT, call).await.unwrap().unwrap(), Ok(Value::from("first")));

        // The loop survives and still serves new calls.
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("again", vec![]).await }
        });
        let id = next_envelope(&mut remote).await.id();
        send(&remote, Envelope::Success { id, result: Value::from(1) });
        assert_eq!(timeout(WAIT, call).await.unwrap().unwrap(), Ok(Value::from(1)));
    }

    #[tokio::test]
    async fn test_close_rejects_every_pending_call() {
        let (peer, mut remote, task) = spawn_peer(MethodRegistry::new());
        let calls: Vec<_> = (0..5)
            .map(|_| {
                let peer = Arc::clone(&peer);
                tokio::spawn(async move { peer.call("hang", vec![]).await })
            })
            .collect();
        for _ in 0..5 {
            next_envelope(&mut remote).await;
        }
        assert_eq!(peer.pending_count(), 5);

        remote.close();

        let failed = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(failed, 5);
        for call in calls {
            let outcome = timeout(WAIT, call).await.unwrap().unwrap();
            assert_eq!(outcome, Err(CallError::ConnectionClosed));
        }
        assert_eq!(peer.pending_count(), 0);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_call_after_close_fails_immediately() {
        let (peer, remote, task) = spawn_peer(MethodRegistry::new());
        remote.close();
        timeout(WAIT, task).await.unwrap().unwrap();
        let outcome = timeout(WAIT, peer.call(PING, vec![])).await.unwrap();
        assert_eq!(outcome, Err(CallError::ConnectionClosed));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_forgets_pending_entry() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let outcome = timeout(Duration::from_millis(50), peer.call("slow", vec![])).await;
        assert!(outcome.is_err());
        assert_eq!(peer.pending_count(), 0);
        // A late reply for the abandoned id is discarded quietly.
        let id = next_envelope(&mut remote).await.id();
        send(&remote, Envelope::Success { id, result: Value::Nil });
        assert!(!peer.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_method_answers_not_found() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::with_builtins());
        send(
            &remote,
            Envelope::Request {
                id: 41,
                method: "nope".to_string(),
                params: vec![],
            },
        );
        match next_envelope(&mut remote).await {
            Envelope::Failure { id, error } => {
                assert_eq!(id, 41);
                assert_eq!(map_field(&error, "code"), Some(&Value::from(METHOD_NOT_FOUND)));
                let message = map_field(&error, "message").and_then(Value::as_str);
                assert!(message.unwrap().contains("nope"));
            }
            other => panic!("Expected Failure, got {other:?}"),
        }
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ping_handler_returns_timestamp() {
        let (_peer, mut remote, _task) = spawn_peer(MethodRegistry::with_builtins());
        let before = Utc::now().timestamp_millis();
        send(
            &remote,
            Envelope::Request {
                id: 1,
                method: PING.to_string(),
                params: vec![],
            },
        );
        match next_envelope(&mut remote).await {
            Envelope::Success { id, result } => {
                assert_eq!(id, 1);
                assert!(result.as_i64().unwrap() >= before);
            }
            other => panic!("Expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_become_failures() {
        let methods = MethodRegistry::new()
            .with_fn("fail", |_p: Arc<Peer>, _v: Vec<Value>| async move {
                Err(HandlerError::with_code(418, "teapot"))
            })
            .with_fn("panic", |_p: Arc<Peer>, _v: Vec<Value>| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(Value::Nil)
            });
        let (_peer, mut remote, _task) = spawn_peer(methods);

        send(&remote, Envelope::Request { id: 1, method: "fail".into(), params: vec![] });
        match next_envelope(&mut remote).await {
            Envelope::Failure { id, error } => {
                assert_eq!(id, 1);
                assert_eq!(error, error_value(418, "teapot"));
            }
            other => panic!("Expected Failure, got {other:?}"),
        }

        send(&remote, Envelope::Request { id: 2, method: "panic".into(), params: vec![] });
        match next_envelope(&mut remote).await {
            Envelope::Failure { id, error } => {
                assert_eq!(id, 2);
                assert_eq!(map_field(&error, "code"), Some(&Value::from(HANDLER_FAILED)));
            }
            other => panic!("Expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_others() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let methods = MethodRegistry::new()
            .with_fn("slow", move |_p: Arc<Peer>, _v: Vec<Value>| {
                let mut release = release_rx.clone();
                async move {
                    while !*release.borrow_and_update() {
                        if release.changed().await.is_err() {
                            break;
                        }
                    }
                    Ok(Value::from("slow"))
                }
            })
            .with_fn("fast", |_p: Arc<Peer>, _v: Vec<Value>| async move { Ok(Value::from("fast")) });
        let (_peer, mut remote, _task) = spawn_peer(methods);

        send(&remote, Envelope::Request { id: 1, method: "slow".into(), params: vec![] });
        send(&remote, Envelope::Request { id: 2, method: "fast".into(), params: vec![] });

        match next_envelope(&mut remote).await {
            Envelope::Success { id, result } => {
                assert_eq!(id, 2);
                assert_eq!(result, Value::from("fast"));
            }
            other => panic!("Expected fast Success, got {other:?}"),
        }

        release_tx.send_replace(true);
        assert_eq!(next_envelope(&mut remote).await.id(), 1);
    }

    /// Encode a map with string keys the way another MessagePack library would.
    fn raw_map(entries: Vec<(&str, Value)>) -> Vec<u8> {
        let map = Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        );
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &map).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_binary_result_completes_call() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("blob", vec![]).await }
        });
        let id = next_envelope(&mut remote).await.id();

        remote
            .send(raw_map(vec![
                ("id", Value::from(id)),
                ("result", Value::Binary(vec![1, 2, 3])),
            ]))
            .unwrap();

        let outcome = timeout(WAIT, call).await.unwrap().unwrap();
        assert_eq!(outcome, Ok(Value::Binary(vec![1, 2, 3])));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_binary_param_reaches_handler() {
        let methods =
            MethodRegistry::new().with_fn("len", |_p: Arc<Peer>, v: Vec<Value>| async move {
                match v.first() {
                    Some(Value::Binary(bytes)) => Ok(Value::from(bytes.len() as u64)),
                    other => Err(HandlerError::new(format!("expected bytes, got {other:?}"))),
                }
            });
        let (_peer, mut remote, _task) = spawn_peer(methods);

        remote
            .send(raw_map(vec![
                ("method", Value::from("len")),
                ("params", Value::Array(vec![Value::Binary(vec![9, 9, 9, 9])])),
                ("id", Value::from(5)),
            ]))
            .unwrap();

        match next_envelope(&mut remote).await {
            Envelope::Success { id, result } => {
                assert_eq!(id, 5);
                assert_eq!(result, Value::from(4));
            }
            other => panic!("Expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_fails_matching_call() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("odd", vec![]).await }
        });
        let id = next_envelope(&mut remote).await.id();

        // Carries the id but neither result nor error.
        remote.send(raw_map(vec![("id", Value::from(id))])).unwrap();

        let outcome = timeout(WAIT, call).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(CallError::MalformedResponse(_))));
        assert_eq!(peer.pending_count(), 0);
        assert!(!peer.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_request_answers_bad_request() {
        let (_peer, mut remote, _task) = spawn_peer(MethodRegistry::with_builtins());

        remote
            .send(raw_map(vec![
                ("method", Value::from(PING)),
                ("params", Value::from("not a list")),
                ("id", Value::from(6)),
            ]))
            .unwrap();

        match next_envelope(&mut remote).await {
            Envelope::Failure { id, error } => {
                assert_eq!(id, 6);
                assert_eq!(map_field(&error, "code"), Some(&Value::from(BAD_REQUEST)));
            }
            other => panic!("Expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_resolves_after_pending_calls_fail() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::new());
        let call = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.call("hang", vec![]).await }
        });
        next_envelope(&mut remote).await;

        let waiter = tokio::spawn({
            let peer = Arc::clone(&peer);
            async move { peer.closed().await }
        });
        remote.close();

        timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(peer.is_closed());
        let outcome = timeout(WAIT, call).await.unwrap().unwrap();
        assert_eq!(outcome, Err(CallError::ConnectionClosed));
        // Already closed: returns at once.
        timeout(WAIT, peer.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dropped() {
        let (peer, mut remote, _task) = spawn_peer(MethodRegistry::with_builtins());
        remote.send(vec![0xc1, 0xc1]).unwrap();
        remote.send(b"not msgpack at all".to_vec()).unwrap();
        send(&remote, Envelope::Request { id: 7, method: PING.into(), params: vec![] });
        assert_eq!(next_envelope(&mut remote).await.id(), 7);
        assert!(!peer.is_closed());
    }
}
