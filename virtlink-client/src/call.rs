//! In-flight call handles.
//!
//! A submitted request is represented twice: the caller holds a
//! [`PendingCall`]/[`PendingBatch`] future, and the tracker holds the
//! matching [`TrackedCall`] completion handle in its maps. Completion is a
//! oneshot send, so terminal state is latched by construction: whoever takes
//! the sender first wins and every later delivery is ignored.
//!
//! A batch registers the same [`BatchCall`] under every member id. Responses
//! land in a slot array indexed by the id-to-position mapping captured at
//! submission, so the caller always observes results in input order no
//! matter how the peer interleaves its replies.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use virtlink_core::{Error, Id, JsonRpcRequest, JsonRpcResponse};

/// Completion handle held by the tracker; single or batch.
#[derive(Clone)]
pub(crate) enum TrackedCall {
    Single(SingleCall),
    Batch(BatchCall),
}

impl TrackedCall {
    /// Route one response to the underlying call. Ignored once terminal.
    pub(crate) fn deliver(&self, response: JsonRpcResponse) {
        match self {
            TrackedCall::Single(call) => call.deliver(response),
            TrackedCall::Batch(call) => call.deliver(response),
        }
    }

    /// True once the caller-visible future has been completed.
    pub(crate) fn is_terminal(&self) -> bool {
        match self {
            TrackedCall::Single(call) => call.is_terminal(),
            TrackedCall::Batch(call) => call.is_terminal(),
        }
    }

    /// Follow a retry's fresh id. Single calls carry no id mapping of their
    /// own, so only batches react.
    pub(crate) fn rekey(&self, old_id: &Id, new_id: Id) {
        if let TrackedCall::Batch(call) = self {
            call.rekey(old_id, new_id);
        }
    }
}

/// Completion side of a single request.
#[derive(Clone)]
pub(crate) struct SingleCall {
    tx: Arc<Mutex<Option<oneshot::Sender<JsonRpcResponse>>>>,
}

impl SingleCall {
    pub(crate) fn new() -> (Self, PendingCall) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            PendingCall { rx },
        )
    }

    fn deliver(&self, response: JsonRpcResponse) {
        if let Some(tx) = self.tx.lock().expect("call slot poisoned").take() {
            let _ = tx.send(response);
        }
    }

    fn is_terminal(&self) -> bool {
        self.tx.lock().expect("call slot poisoned").is_none()
    }
}

/// Completion side of a batch; shared by every member id.
#[derive(Clone)]
pub(crate) struct BatchCall {
    inner: Arc<Mutex<BatchState>>,
}

struct BatchState {
    index_by_id: HashMap<Id, usize>,
    responses: Vec<Option<JsonRpcResponse>>,
    pending: usize,
    tx: Option<oneshot::Sender<Vec<JsonRpcResponse>>>,
}

impl BatchCall {
    pub(crate) fn new(requests: &[JsonRpcRequest]) -> (Self, PendingBatch) {
        let (tx, rx) = oneshot::channel();
        let index_by_id = requests
            .iter()
            .enumerate()
            .map(|(index, request)| (request.id.clone(), index))
            .collect();
        (
            Self {
                inner: Arc::new(Mutex::new(BatchState {
                    index_by_id,
                    responses: vec![None; requests.len()],
                    pending: requests.len(),
                    tx: Some(tx),
                })),
            },
            PendingBatch { rx },
        )
    }

    /// Alias a slot under the fresh id a retry re-sends with. The previous
    /// ids stay mapped so a timeout keyed to the original id still lands.
    pub(crate) fn rekey(&self, old_id: &Id, new_id: Id) {
        let mut state = self.inner.lock().expect("batch state poisoned");
        if let Some(index) = state.index_by_id.get(old_id).copied() {
            state.index_by_id.insert(new_id, index);
        }
    }

    fn deliver(&self, response: JsonRpcResponse) {
        let mut state = self.inner.lock().expect("batch state poisoned");
        if state.tx.is_none() {
            return;
        }
        let Some(index) = state.index_by_id.get(&response.id).copied() else {
            tracing::debug!(id = %response.id, "batch response with unknown id dropped");
            return;
        };
        if state.responses[index].is_none() {
            state.responses[index] = Some(response);
            state.pending -= 1;
        }
        if state.pending == 0 {
            let responses = state
                .responses
                .iter_mut()
                .map(|slot| slot.take().expect("filled batch slot"))
                .collect();
            if let Some(tx) = state.tx.take() {
                let _ = tx.send(responses);
            }
        }
    }

    fn is_terminal(&self) -> bool {
        self.inner.lock().expect("batch state poisoned").tx.is_none()
    }
}

/// Future resolving to the response of a single call.
///
/// The response may itself carry an error object; retries and timeouts are
/// invisible here, the same future is completed whichever attempt answers.
/// Use [`JsonRpcResponse::into_result`] to collapse it.
pub struct PendingCall {
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl Future for PendingCall {
    type Output = virtlink_core::Result<JsonRpcResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| Error::ClientClosed))
    }
}

/// Future resolving to the responses of a batch, in submission order.
pub struct PendingBatch {
    rx: oneshot::Receiver<Vec<JsonRpcResponse>>,
}

impl Future for PendingBatch {
    type Output = virtlink_core::Result<Vec<JsonRpcResponse>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| Error::ClientClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtlink_core::JsonRpcErrorData;

    fn request(id: &str) -> JsonRpcRequest {
        JsonRpcRequest::new("VM.getStats", None, Id::from(id))
    }

    #[tokio::test]
    async fn single_call_completes_once() {
        let (call, pending) = SingleCall::new();
        assert!(!call.is_terminal());

        call.deliver(JsonRpcResponse::success(serde_json::json!(1), Id::from("a")));
        assert!(call.is_terminal());

        // Second delivery is ignored, the caller still sees the first.
        call.deliver(JsonRpcResponse::success(serde_json::json!(2), Id::from("a")));

        let response = pending.await.unwrap();
        assert_eq!(response.result, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn dropped_completion_surfaces_client_closed() {
        let (call, pending) = SingleCall::new();
        drop(call);
        assert!(matches!(pending.await, Err(Error::ClientClosed)));
    }

    #[tokio::test]
    async fn batch_orders_responses_by_submission_index() {
        let requests = vec![request("a"), request("b"), request("c")];
        let (call, pending) = BatchCall::new(&requests);

        // Peer answers in reverse order.
        call.deliver(JsonRpcResponse::success(serde_json::json!(3), Id::from("c")));
        call.deliver(JsonRpcResponse::success(serde_json::json!(2), Id::from("b")));
        assert!(!call.is_terminal());
        call.deliver(JsonRpcResponse::success(serde_json::json!(1), Id::from("a")));
        assert!(call.is_terminal());

        let responses = pending.await.unwrap();
        let results: Vec<_> = responses.into_iter().map(|r| r.result.unwrap()).collect();
        assert_eq!(results, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
    }

    #[tokio::test]
    async fn batch_accepts_error_members() {
        let requests = vec![request("a"), request("b")];
        let (call, pending) = BatchCall::new(&requests);

        call.deliver(JsonRpcResponse::error(
            JsonRpcErrorData::internal_error("boom"),
            Id::from("a"),
        ));
        call.deliver(JsonRpcResponse::success(serde_json::json!("ok"), Id::from("b")));

        let responses = pending.await.unwrap();
        assert!(responses[0].is_error());
        assert!(responses[1].is_success());
    }

    #[tokio::test]
    async fn rekey_moves_a_slot_to_the_fresh_id() {
        let requests = vec![request("a"), request("b")];
        let (call, pending) = BatchCall::new(&requests);

        call.rekey(&Id::from("a"), Id::from("a2"));
        call.deliver(JsonRpcResponse::success(serde_json::json!(1), Id::from("a2")));
        call.deliver(JsonRpcResponse::success(serde_json::json!(2), Id::from("b")));

        let responses = pending.await.unwrap();
        assert_eq!(responses[0].result, Some(serde_json::json!(1)));
    }
}
