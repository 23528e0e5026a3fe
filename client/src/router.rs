//! Message router — dispatches decoded frames by envelope kind.
//!
//! Outgoing requests get a correlation id from a monotonic counter that is
//! never reset, so an id can never be reused within a session, even across
//! process restarts. The pending-request map is the single point of mutual
//! exclusion; everything else is either immutable after construction or
//! confined to one task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use tether_types::ClientError;

use crate::protocol::{self, Incoming, Notification, Request};
use crate::session::{SessionSignal, SignalKind};

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, ClientError>>>>;

/// Handler for a process-originated request. Returns the result value or
/// an error message (mapped to a JSON-RPC internal error).
pub(crate) type RequestHandler =
    Box<dyn Fn(Option<serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

pub(crate) struct Router {
    /// Spawn generation, stamped on every signal this router emits.
    epoch: u64,
    next_id: Arc<AtomicU64>,
    pending: Pending,
    outbound: mpsc::Sender<serde_json::Value>,
    closed: AtomicBool,
    dropped_responses: AtomicU64,
    handlers: HashMap<String, RequestHandler>,
    subscribers: HashMap<String, Vec<mpsc::Sender<SessionSignal>>>,
}

impl Router {
    pub fn new(epoch: u64, next_id: Arc<AtomicU64>, outbound: mpsc::Sender<serde_json::Value>) -> Self {
        Self {
            epoch,
            next_id,
            pending: Mutex::new(HashMap::new()),
            outbound,
            closed: AtomicBool::new(false),
            dropped_responses: AtomicU64::new(0),
            handlers: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }

    /// Register a subscriber channel for a notification method. Call
    /// before the reader task starts; the registry is immutable afterwards.
    pub fn subscribe(&mut self, method: impl Into<String>, tx: mpsc::Sender<SessionSignal>) {
        self.subscribers.entry(method.into()).or_default().push(tx);
    }

    /// Register a handler for a process-originated request method.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn register_handler(&mut self, method: impl Into<String>, handler: RequestHandler) {
        self.handlers.insert(method.into(), handler);
    }

    /// Send a request and await its response, bounded by `timeout`.
    ///
    /// On expiry the pending entry is evicted and the caller gets
    /// [`ClientError::Timeout`]; a response arriving later is dropped by
    /// the unexpected-response path.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::SessionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::TransportIo {
                    detail: e.to_string(),
                });
            }
        };
        if let Err(e) = self.enqueue(frame).await {
            // Never leak the pending entry when the frame can't be queued.
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Sender dropped without cancellation: the reader died.
                self.pending.lock().await.remove(&id);
                Err(ClientError::TransportClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a fire-and-forget notification.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|e| {
            ClientError::TransportIo {
                detail: e.to_string(),
            }
        })?;
        self.enqueue(frame).await
    }

    /// Route one decoded frame.
    pub async fn dispatch(&self, frame: &serde_json::Value) {
        let Some(incoming) = protocol::classify(frame) else {
            tracing::trace!("ignoring malformed frame");
            return;
        };

        match incoming {
            Incoming::Response { id, result, error } => {
                let sender = self.pending.lock().await.remove(&id);
                match sender {
                    Some(tx) => {
                        let outcome = match error {
                            Some(e) => Err(ClientError::ResponseError {
                                code: e.code,
                                message: e.message,
                            }),
                            None => Ok(result.unwrap_or(serde_json::Value::Null)),
                        };
                        // The caller may have timed out and gone away.
                        let _ = tx.send(outcome);
                    }
                    None => {
                        self.dropped_responses.fetch_add(1, Ordering::Relaxed);
                        let record = ClientError::UnexpectedResponse { id };
                        tracing::debug!(%record, "dropping response");
                    }
                }
            }
            Incoming::Request { id, method, params } => {
                let reply = match self.handlers.get(&method) {
                    Some(handler) => match handler(params) {
                        Ok(result) => serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": result
                        }),
                        Err(message) => serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": { "code": -32603, "message": message }
                        }),
                    },
                    None => {
                        // The process may block waiting on the reply, so an
                        // unknown method still gets an answer.
                        tracing::debug!(%method, "replying method not found");
                        protocol::method_not_found(&id, &method)
                    }
                };
                let _ = self.enqueue(reply).await;
            }
            Incoming::Notification { method, params } => match self.subscribers.get(&method) {
                Some(subscribers) => {
                    for tx in subscribers {
                        let _ = tx
                            .send(SessionSignal {
                                epoch: self.epoch,
                                kind: SignalKind::Notification {
                                    method: method.clone(),
                                    params: params.clone(),
                                },
                            })
                            .await;
                    }
                }
                None => tracing::trace!(%method, "ignoring unknown notification"),
            },
        }
    }

    /// Mark the router closed and cancel every pending request with
    /// [`ClientError::SessionClosed`]. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ClientError::SessionClosed));
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Count of responses dropped for lack of a pending request.
    pub fn dropped_responses(&self) -> u64 {
        self.dropped_responses.load(Ordering::Relaxed)
    }

    async fn enqueue(&self, frame: serde_json::Value) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::SessionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_router(capacity: usize) -> (Arc<Router>, mpsc::Receiver<serde_json::Value>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let router = Router::new(1, Arc::new(AtomicU64::new(1)), out_tx);
        (Arc::new(router), out_rx)
    }

    async fn sent_request_id(out_rx: &mut mpsc::Receiver<serde_json::Value>) -> u64 {
        out_rx.recv().await.unwrap()["id"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let (router, mut out_rx) = test_router(8);

        let caller = router.clone();
        let handle = tokio::spawn(async move {
            caller
                .request("textDocument/hover", None, Duration::from_secs(5))
                .await
        });

        let id = sent_request_id(&mut out_rx).await;
        router
            .dispatch(&serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"n": 1}}))
            .await;
        router
            .dispatch(&serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"n": 2}}))
            .await;

        let got = handle.await.unwrap().unwrap();
        assert_eq!(got["n"], 1, "only the first response is delivered");
        assert_eq!(router.dropped_responses(), 1);
    }

    #[tokio::test]
    async fn test_unknown_correlation_id_is_dropped() {
        let (router, _out_rx) = test_router(8);
        router
            .dispatch(&serde_json::json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
            .await;
        assert_eq!(router.dropped_responses(), 1);
    }

    #[tokio::test]
    async fn test_error_response_surfaces_to_caller() {
        let (router, mut out_rx) = test_router(8);

        let caller = router.clone();
        let handle = tokio::spawn(async move {
            caller
                .request("workspace/symbol", None, Duration::from_secs(5))
                .await
        });

        let id = sent_request_id(&mut out_rx).await;
        router
            .dispatch(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32600, "message": "invalid request" }
            }))
            .await;

        match handle.await.unwrap() {
            Err(ClientError::ResponseError { code, message }) => {
                assert_eq!(code, -32600);
                assert_eq!(message, "invalid request");
            }
            other => panic!("expected response error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unhandled_server_request_gets_method_not_found() {
        let (router, mut out_rx) = test_router(8);

        router
            .dispatch(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "client/registerCapability",
                "params": {}
            }))
            .await;

        let reply = out_rx.recv().await.unwrap();
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_registered_handler_answers_server_request() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let mut router = Router::new(1, Arc::new(AtomicU64::new(1)), out_tx);
        router.register_handler(
            "workspace/configuration",
            Box::new(|_params| Ok(serde_json::json!([null]))),
        );
        let router = Arc::new(router);

        router
            .dispatch(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "workspace/configuration",
                "params": { "items": [] }
            }))
            .await;

        let reply = out_rx.recv().await.unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"], serde_json::json!([null]));
    }

    #[tokio::test]
    async fn test_subscriber_receives_notification() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (sub_tx, mut sub_rx) = mpsc::channel(8);
        let mut router = Router::new(3, Arc::new(AtomicU64::new(1)), out_tx);
        router.subscribe("textDocument/publishDiagnostics", sub_tx);
        let router = Arc::new(router);

        router
            .dispatch(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": { "uri": "file:///a.html", "diagnostics": [] }
            }))
            .await;

        let signal = sub_rx.try_recv().unwrap();
        assert_eq!(signal.epoch, 3);
        match signal.kind {
            SignalKind::Notification { method, params } => {
                assert_eq!(method, "textDocument/publishDiagnostics");
                assert_eq!(params.unwrap()["uri"], "file:///a.html");
            }
            other => panic!("expected notification signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_notification_ignored() {
        let (router, mut out_rx) = test_router(8);
        router
            .dispatch(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "window/logMessage",
                "params": { "type": 3, "message": "hello" }
            }))
            .await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_with_session_closed() {
        let (router, mut out_rx) = test_router(8);

        let caller = router.clone();
        let handle = tokio::spawn(async move {
            caller
                .request("textDocument/hover", None, Duration::from_secs(5))
                .await
        });

        let _ = sent_request_id(&mut out_rx).await;
        router.close().await;

        match handle.await.unwrap() {
            Err(ClientError::SessionClosed) => {}
            other => panic!("expected SessionClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_router_fails_fast_without_transport_io() {
        let (router, mut out_rx) = test_router(8);
        router.close().await;

        let err = router
            .request("textDocument/hover", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));

        let err = router.notify("textDocument/didOpen", None).await.unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));

        assert!(out_rx.try_recv().is_err(), "no frame may reach the transport");
    }

    #[tokio::test]
    async fn test_timeout_evicts_pending_and_late_response_is_dropped() {
        let (router, mut out_rx) = test_router(8);

        let err = router
            .request("textDocument/hover", None, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { timeout_ms: 20 }));

        let id = sent_request_id(&mut out_rx).await;
        router
            .dispatch(&serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}}))
            .await;
        assert_eq!(router.dropped_responses(), 1);
    }

    #[tokio::test]
    async fn test_ids_stay_unique_across_router_generations() {
        let counter = Arc::new(AtomicU64::new(1));

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let first = Router::new(1, counter.clone(), out_tx);
        let _ = first
            .request("textDocument/hover", None, Duration::from_millis(10))
            .await;
        let first_id = sent_request_id(&mut out_rx).await;

        let (out_tx, mut out_rx) = mpsc::channel(8);
        let second = Router::new(2, counter, out_tx);
        let _ = second
            .request("textDocument/hover", None, Duration::from_millis(10))
            .await;
        let second_id = sent_request_id(&mut out_rx).await;

        assert!(second_id > first_id, "ids are never reused after a restart");
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_panic() {
        let (router, _out_rx) = test_router(8);
        router.dispatch(&serde_json::json!({"jsonrpc": "2.0"})).await;
        router.dispatch(&serde_json::json!(42)).await;
        assert_eq!(router.dropped_responses(), 0);
    }
}
