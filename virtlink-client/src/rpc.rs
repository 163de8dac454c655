//! JSON-RPC facade over a reactor client and the shared tracker.
//!
//! [`JsonRpcClient`] is deliberately thin: it assigns ids, encodes, hands
//! completion handles to the tracker, and pushes bytes at the
//! [`ReactorClient`]. Everything stateful lives in the tracker (in-flight
//! calls, retry records) and the reactor client (the connection).
//!
//! Submission is ordered so each failure surfaces in the right place: a
//! connect failure or encoding fault returns synchronously before anything
//! is registered; a duplicate id fails synchronously without touching the
//! existing registration; and a send failure *after* registration leaves
//! the retry record installed, so the tracker's deadline path, not the
//! submitter, drives the call to completion. That last choice mirrors the
//! management-engine deployments this runtime grew out of and is covered by
//! the retry tests.

use crate::call::{BatchCall, PendingBatch, PendingCall, SingleCall, TrackedCall};
use crate::client::ReactorClient;
use crate::metrics::ClientMetrics;
use crate::notification::NotificationHandler;
use crate::policy::ClientPolicy;
use crate::retry::RetryContext;
use crate::tracker::{ResponseTracker, ResponseTracking};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use virtlink_core::{
    codec, Error, Id, JsonRpcErrorData, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Result,
};

/// Process-wide counter distinguishing the id namespaces of individual
/// clients sharing one tracker.
static NEXT_CLIENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Mints request ids: monotonically increasing strings unique per client.
///
/// Cloned into retry records so the tracker can allocate fresh ids for
/// re-sends from the same namespace.
#[derive(Clone)]
pub(crate) struct IdSequence {
    client: u64,
    next: Arc<AtomicU64>,
}

impl IdSequence {
    fn new() -> Self {
        Self {
            client: NEXT_CLIENT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn next_id(&self) -> Id {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        Id::String(format!("{}-{}", self.client, seq))
    }
}

/// Inbound payload router registered as the reactor client's listener.
struct Router {
    tracker: ResponseTracker,
    client_id: u64,
    notifications: NotificationHandler,
    metrics: Mutex<Option<Arc<ClientMetrics>>>,
}

impl Router {
    fn route(&self, payload: &[u8]) {
        match codec::decode(payload) {
            Ok(JsonRpcMessage::Response(response)) => self.dispatch_response(response),
            Ok(JsonRpcMessage::Batch(members)) => {
                for member in members {
                    match serde_json::from_value::<JsonRpcResponse>(member) {
                        Ok(response) => self.dispatch_response(response),
                        Err(e) => tracing::debug!(error = %e, "non-response batch member dropped"),
                    }
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                if notification.is_heartbeat() {
                    tracing::trace!("peer heartbeat");
                    return;
                }
                if let Some(metrics) = self.metrics.lock().expect("metrics poisoned").as_ref() {
                    metrics.record_notification(&notification.method);
                }
                self.notifications.handle(notification);
            }
            Ok(JsonRpcMessage::Request(request)) => {
                tracing::warn!(method = %request.method, "unexpected request from peer");
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable payload dropped");
            }
        }
    }

    fn dispatch_response(&self, response: JsonRpcResponse) {
        if response.is_issue() {
            let error = response
                .error
                .unwrap_or_else(|| JsonRpcErrorData::internal_error("issue without error object"));
            self.tracker.process_issue(self.client_id, error);
            return;
        }
        match self.tracker.remove_call(&response.id) {
            Some(call) => call.deliver(response),
            None => tracing::debug!(id = %response.id, "response without matching call"),
        }
    }
}

/// Client for single and batched JSON-RPC calls against one host agent.
pub struct JsonRpcClient {
    client: ReactorClient,
    tracker: ResponseTracker,
    policy: ClientPolicy,
    ids: IdSequence,
    router: Arc<Router>,
    reset_on_retry: bool,
}

impl JsonRpcClient {
    /// Wire a reactor client to the shared tracker under the given call
    /// retry policy.
    pub fn new(
        client: ReactorClient,
        tracker: ResponseTracker,
        policy: ClientPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        let router = Arc::new(Router {
            tracker: tracker.clone(),
            client_id: client.client_id(),
            notifications: NotificationHandler::new(),
            metrics: Mutex::new(None),
        });
        {
            let router = router.clone();
            client.add_listener(Arc::new(move |payload: &[u8]| router.route(payload)));
        }
        Ok(Self {
            client,
            tracker,
            policy,
            ids: IdSequence::new(),
            router,
            reset_on_retry: false,
        })
    }

    /// Attach OpenTelemetry instruments: submissions and notifications are
    /// recorded here, the connection-state gauge by the driver, retries and
    /// timeouts by the tracker.
    pub fn with_metrics(self, metrics: Arc<ClientMetrics>) -> Self {
        self.client.set_metrics(metrics.clone());
        *self.router.metrics.lock().expect("metrics poisoned") = Some(metrics);
        self
    }

    /// Drop and re-establish the connection before each retry re-send.
    pub fn with_reset_on_retry(mut self, reset: bool) -> Self {
        self.reset_on_retry = reset;
        self
    }

    /// Submit one request, connecting first if necessary.
    ///
    /// The returned future resolves with the response (possibly an
    /// error-bearing one) once the peer answers, a retry answers, or the
    /// retry budget runs out.
    pub async fn call(&self, request: JsonRpcRequest) -> Result<PendingCall> {
        self.ensure_connected().await?;
        let payload = codec::encode(&request)?;
        let (call, pending) = SingleCall::new();
        self.tracker
            .register_call(&request.id, TrackedCall::Single(call.clone()))?;

        let sent = self.client.send_message(payload);
        self.install_tracking(request, TrackedCall::Single(call));
        if let Err(e) = sent {
            tracing::warn!(error = %e, "send failed, deadline path will complete the call");
        }
        Ok(pending)
    }

    /// Build and submit a request with the next generated id.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Result<PendingCall> {
        let method = method.into();
        if let Some(metrics) = self.metrics() {
            metrics.record_request(&method);
        }
        self.call(JsonRpcRequest::new(method, params, self.ids.next_id()))
            .await
    }

    /// Submit several requests as one JSON array.
    ///
    /// Every member registers against the same batch handle; the returned
    /// future resolves with responses ordered by submission index, however
    /// the peer interleaves its answers.
    pub async fn batch_call(&self, requests: Vec<JsonRpcRequest>) -> Result<PendingBatch> {
        if requests.is_empty() {
            return Err(Error::EncodingFault("batch cannot be empty".to_string()));
        }
        self.ensure_connected().await?;
        let payload = codec::encode_batch(&requests)?;
        let (batch, pending) = BatchCall::new(&requests);
        let tracked = TrackedCall::Batch(batch);
        let ids: Vec<Id> = requests.iter().map(|r| r.id.clone()).collect();
        self.tracker.register_batch(&ids, &tracked)?;

        let sent = self.client.send_message(payload);
        if let Some(metrics) = self.metrics() {
            metrics.record_batch(requests.len() as u64);
        }
        for request in requests {
            self.install_tracking(request, tracked.clone());
        }
        if let Err(e) = sent {
            tracing::warn!(error = %e, "batch send failed, deadline path will complete the calls");
        }
        Ok(pending)
    }

    /// Send a notification; fire-and-forget, nothing is tracked.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.ensure_connected().await?;
        let payload = codec::encode(&JsonRpcNotification::new(method, params))?;
        self.client.send_message(payload)
    }

    /// Route one already-decoded response, as the wire listener does.
    pub fn process_response(&self, response: JsonRpcResponse) {
        self.router.dispatch_response(response);
    }

    /// Register a handler for server-initiated notifications.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcNotification) + Send + Sync + 'static,
    {
        self.router.notifications.register(method, handler);
    }

    /// The notification registry, for bulk management.
    pub fn notifications(&self) -> &NotificationHandler {
        &self.router.notifications
    }

    /// The underlying connection handle.
    pub fn client(&self) -> &ReactorClient {
        &self.client
    }

    /// The shared tracker.
    pub fn tracker(&self) -> &ResponseTracker {
        &self.tracker
    }

    pub fn hostname(&self) -> &str {
        self.client.hostname()
    }

    pub fn is_open(&self) -> bool {
        self.client.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Disconnect; in-flight calls complete with the synthetic
    /// connection-closed error through issue dispatch.
    pub async fn close(&self) {
        self.client.close().await;
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.client.is_open() {
            return Ok(());
        }
        self.client.connect().await.map_err(|e| {
            if let Some(metrics) = self.metrics() {
                metrics.record_error("connect");
            }
            e
        })
    }

    fn install_tracking(&self, request: JsonRpcRequest, call: TrackedCall) {
        let deadline = Instant::now() + self.policy.retry_timeout();
        self.tracker.register_tracking(ResponseTracking::new(
            request,
            call,
            RetryContext::new(&self.policy),
            deadline,
            self.client.clone(),
            self.reset_on_retry,
            self.ids.clone(),
            self.metrics(),
        ));
    }

    fn metrics(&self) -> Option<Arc<ClientMetrics>> {
        self.router.metrics.lock().expect("metrics poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_sequences_are_monotonic_and_disjoint() {
        let a = IdSequence::new();
        let b = IdSequence::new();

        let a1 = a.next_id();
        let a2 = a.next_id();
        assert_ne!(a1, a2);

        let b1 = b.next_id();
        assert_ne!(a1, b1);

        let Id::String(first) = &a1 else {
            panic!("generated ids are strings")
        };
        let Id::String(second) = &a2 else {
            panic!("generated ids are strings")
        };
        let tail = |s: &str| {
            s.rsplit('-')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or_default()
        };
        assert_eq!(tail(first) + 1, tail(second));
    }
}
