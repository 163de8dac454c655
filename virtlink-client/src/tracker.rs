//! Response tracking, timeouts and retries.
//!
//! One [`ResponseTracker`] is shared by every `JsonRpcClient` in the
//! process. It keeps two maps (completion handles by request id, and retry
//! records by request id) behind a single mutex, and runs a worker thread
//! that sweeps the retry records every poll interval.
//!
//! When a record's deadline expires the sweep either drops it (the call
//! already completed), consumes a retry attempt and re-sends the request
//! under a **fresh id** (reusing an id across attempts would break the
//! one-entry-per-id invariant and can confuse stateful peers; the original
//! call handle is re-keyed instead), or, with the budget exhausted,
//! completes the call with the internal timeout error carrying the request
//! id.
//!
//! Issue dispatch handles null-id faults: every in-flight call bound to the
//! originating client completes with the fault's error and both maps are
//! cleared of them.

use crate::call::TrackedCall;
use crate::client::ReactorClient;
use crate::metrics::ClientMetrics;
use crate::retry::RetryContext;
use crate::rpc::IdSequence;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::Instant;
use virtlink_core::{codec, Error, Id, JsonRpcErrorData, JsonRpcRequest, JsonRpcResponse, Result};

/// Default sweep cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Retry record for one in-flight request.
pub(crate) struct ResponseTracking {
    request: JsonRpcRequest,
    /// Id the caller submitted under; error payloads are keyed to it even
    /// after retries re-sent the request with fresh ids.
    original_id: Id,
    call: TrackedCall,
    context: RetryContext,
    deadline: Instant,
    client: ReactorClient,
    reset_connection: bool,
    ids: IdSequence,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ResponseTracking {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        request: JsonRpcRequest,
        call: TrackedCall,
        context: RetryContext,
        deadline: Instant,
        client: ReactorClient,
        reset_connection: bool,
        ids: IdSequence,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            original_id: request.id.clone(),
            request,
            call,
            context,
            deadline,
            client,
            reset_connection,
            ids,
            metrics,
        }
    }
}

struct TrackerState {
    calls: HashMap<Id, TrackedCall>,
    tracking: HashMap<Id, ResponseTracking>,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    running: AtomicBool,
}

/// Background timekeeper correlating requests with responses.
///
/// Cheap to clone; all clones share the maps and the worker thread. The
/// worker stops when `shutdown` is called or every handle is dropped.
#[derive(Clone)]
pub struct ResponseTracker {
    inner: Arc<TrackerInner>,
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Create a tracker sweeping at the given cadence.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let inner = Arc::new(TrackerInner {
            state: Mutex::new(TrackerState {
                calls: HashMap::new(),
                tracking: HashMap::new(),
            }),
            running: AtomicBool::new(true),
        });

        let weak = Arc::downgrade(&inner);
        std::thread::Builder::new()
            .name("virtlink-tracker".to_string())
            .spawn(move || worker(weak, poll_interval))
            .expect("failed to spawn tracker thread");

        Self { inner }
    }

    /// Register a completion handle under a request id.
    ///
    /// Fails synchronously when the id is already in flight; the existing
    /// registration is untouched.
    pub(crate) fn register_call(&self, id: &Id, call: TrackedCall) -> Result<()> {
        let mut state = self.lock();
        if state.calls.contains_key(id) {
            return Err(Error::RequestAlreadyInFlight(id.to_string()));
        }
        state.calls.insert(id.clone(), call);
        Ok(())
    }

    /// Register one batch handle under every member id, all or nothing.
    pub(crate) fn register_batch(&self, ids: &[Id], call: &TrackedCall) -> Result<()> {
        let mut state = self.lock();
        for (index, id) in ids.iter().enumerate() {
            if state.calls.contains_key(id) || ids[..index].contains(id) {
                return Err(Error::RequestAlreadyInFlight(id.to_string()));
            }
        }
        for id in ids {
            state.calls.insert(id.clone(), call.clone());
        }
        Ok(())
    }

    /// Install the retry record for a request.
    pub(crate) fn register_tracking(&self, tracking: ResponseTracking) {
        let id = tracking.request.id.clone();
        self.lock().tracking.insert(id, tracking);
    }

    /// Remove and return the handle for a known id, dropping its retry
    /// record with it.
    pub(crate) fn remove_call(&self, id: &Id) -> Option<TrackedCall> {
        let mut state = self.lock();
        state.tracking.remove(id);
        state.calls.remove(id)
    }

    /// Fan a protocol-level fault out to every in-flight call of one client
    /// and clear their entries.
    pub(crate) fn process_issue(&self, client_id: u64, error: JsonRpcErrorData) {
        let drained: Vec<ResponseTracking> = {
            let mut state = self.lock();
            let ids: Vec<Id> = state
                .tracking
                .iter()
                .filter(|(_, t)| t.client.client_id() == client_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    state.calls.remove(&id);
                    state.tracking.remove(&id)
                })
                .collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::warn!(
            host = drained[0].client.hostname(),
            calls = drained.len(),
            code = error.code,
            "issue dispatched to in-flight calls"
        );
        for tracking in drained {
            tracking
                .call
                .deliver(JsonRpcResponse::error(error.clone(), tracking.original_id));
        }
    }

    /// Number of in-flight call registrations.
    pub fn pending_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// True when both maps are empty.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.calls.is_empty() && state.tracking.is_empty()
    }

    /// Stop the worker thread.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Relaxed);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.inner.state.lock().expect("tracker state poisoned")
    }
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn worker(weak: Weak<TrackerInner>, poll_interval: Duration) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tracker runtime");

    runtime.block_on(async move {
        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if !inner.running.load(Ordering::Relaxed) {
                break;
            }
            sweep(&inner).await;
        }
    });
}

/// One pass over the retry records: drop completed, retry expired with
/// budget, time out the rest.
async fn sweep(inner: &TrackerInner) {
    let now = Instant::now();
    let mut retries = Vec::new();
    let mut timed_out = Vec::new();
    {
        let mut state = inner.state.lock().expect("tracker state poisoned");
        let due: Vec<Id> = state
            .tracking
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            let Some(mut tracking) = state.tracking.remove(&id) else {
                continue;
            };
            if tracking.call.is_terminal() {
                state.calls.remove(&id);
                continue;
            }
            if tracking.context.consume_attempt() {
                retries.push((id, tracking));
            } else {
                state.calls.remove(&id);
                timed_out.push(tracking);
            }
        }
    }

    for (old_id, tracking) in retries {
        retry_call(inner, old_id, tracking).await;
    }

    for tracking in timed_out {
        tracing::error!(
            id = %tracking.original_id,
            method = %tracking.request.method,
            host = tracking.client.hostname(),
            "call timed out, retries exhausted"
        );
        if let Some(metrics) = &tracking.metrics {
            metrics.record_timeout(&tracking.request.method);
        }
        tracking.call.deliver(JsonRpcResponse::error(
            JsonRpcErrorData::request_timeout(),
            tracking.original_id.clone(),
        ));
    }
}

/// Re-send one expired request under a fresh id, keeping the original call
/// handle. A failed send is left for the next deadline expiry to handle.
async fn retry_call(inner: &TrackerInner, old_id: Id, mut tracking: ResponseTracking) {
    let new_id = tracking.ids.next_id();
    tracing::warn!(
        old_id = %old_id,
        new_id = %new_id,
        method = %tracking.request.method,
        host = tracking.client.hostname(),
        attempts_left = tracking.context.attempts_remaining(),
        "retrying call"
    );
    if let Some(metrics) = &tracking.metrics {
        metrics.record_retry(&tracking.request.method);
    }

    {
        let mut state = inner.state.lock().expect("tracker state poisoned");
        if let Some(call) = state.calls.remove(&old_id) {
            state.calls.insert(new_id.clone(), call);
        }
    }
    tracking.call.rekey(&old_id, new_id.clone());
    tracking.request.id = new_id.clone();
    tracking.deadline = Instant::now() + tracking.context.retry_timeout();

    if tracking.reset_connection {
        tracking.client.close().await;
    }

    let outcome = resend(&tracking).await;
    if let Err(e) = outcome {
        tracing::warn!(id = %new_id, error = %e, "retry send failed, awaiting next deadline");
    }

    inner
        .state
        .lock()
        .expect("tracker state poisoned")
        .tracking
        .insert(new_id, tracking);
}

async fn resend(tracking: &ResponseTracking) -> Result<()> {
    if !tracking.client.is_open() {
        tracking.client.connect().await?;
    }
    let payload = codec::encode(&tracking.request)?;
    tracking.client.send_message(payload)
}
