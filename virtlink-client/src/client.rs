//! Per-connection client driven by the reactor.
//!
//! A [`ReactorClient`] owns one connection to a host agent and moves through
//! three states: `Closed`, `Initializing` (TCP connect plus TLS/WebSocket
//! handshake in progress) and `Open`. All socket work happens in a driver
//! task on the reactor thread; caller threads only enqueue outbound frames
//! and await state transitions.
//!
//! Messages submitted while the client is still `Initializing` are buffered
//! in the outbound queue and flushed in submission order once the handshake
//! completes. The queue is bounded; when it overflows, `send_message` fails
//! fast with `ConnectionLost` instead of blocking the caller.
//!
//! Any I/O error, decode fault or heartbeat expiry tears the connection
//! down: the state returns to `Closed`, buffers are released, and listeners
//! receive a synthetic null-id error message so in-flight calls observe the
//! disconnect through the ordinary response path.

use crate::metrics::ClientMetrics;
use crate::policy::ClientPolicy;
use crate::reactor::ReactorHandle;
use crate::transport::{Connection, ConnectionConfig, Inbound};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use virtlink_core::{codec, Error, JsonRpcErrorData, JsonRpcResponse, Result};

/// Bound on the outbound queue, in frames.
const OUTBOX_CAPACITY: usize = 1024;

/// Cadence of the driver's heartbeat checks.
const HEARTBEAT_TICK: Duration = Duration::from_millis(100);

/// Base delay between connect attempts; doubled per attempt up to the cap,
/// plus up to 25% jitter.
const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(100);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Reason string carried by the synthetic message emitted on `close()`.
pub const CLIENT_CLOSED: &str = "client closed";

/// Reason string carried by the synthetic message emitted on incoming
/// heartbeat expiry.
pub const HEARTBEAT_EXCEEDED: &str = "heartbeat exceeded";

/// Callback invoked with every whole inbound payload, including the
/// synthetic error messages emitted on disconnect. Runs on the reactor
/// thread; keep it short.
pub type MessageListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

enum LinkState {
    Closed,
    Initializing {
        outbox: mpsc::Sender<Outbound>,
        ready: watch::Receiver<Option<Result<()>>>,
    },
    Open {
        outbox: mpsc::Sender<Outbound>,
    },
}

enum Outbound {
    Message(Vec<u8>),
    Close(oneshot::Sender<()>),
}

pub(crate) struct ClientShared {
    reactor: ReactorHandle,
    client_id: u64,
    config: ConnectionConfig,
    policy: Mutex<ClientPolicy>,
    state: Mutex<LinkState>,
    listeners: Mutex<Vec<MessageListener>>,
    metrics: Mutex<Option<Arc<ClientMetrics>>>,
}

impl ClientShared {
    fn policy(&self) -> ClientPolicy {
        self.policy.lock().expect("policy poisoned").clone()
    }

    fn label(&self) -> String {
        format!("{}:{}/{}", self.config.host, self.config.port, self.client_id)
    }

    fn emit(&self, payload: &[u8]) {
        let listeners: Vec<MessageListener> =
            self.listeners.lock().expect("listeners poisoned").clone();
        for listener in listeners {
            listener(payload);
        }
    }

    fn record_state(&self, state: i64) {
        if let Some(metrics) = self.metrics.lock().expect("metrics poisoned").as_ref() {
            metrics.update_connection_state(state);
        }
    }
}

/// Handle to one reactor-driven connection. Cheap to clone; all clones share
/// the same connection and state.
#[derive(Clone)]
pub struct ReactorClient {
    shared: Arc<ClientShared>,
}

impl ReactorClient {
    pub(crate) fn new(reactor: ReactorHandle, client_id: u64, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                reactor,
                client_id,
                config,
                policy: Mutex::new(ClientPolicy::default()),
                state: Mutex::new(LinkState::Closed),
                listeners: Mutex::new(Vec::new()),
                metrics: Mutex::new(None),
            }),
        }
    }

    /// Identity used to scope issue dispatch to this connection.
    pub(crate) fn client_id(&self) -> u64 {
        self.shared.client_id
    }

    /// Hostname this client connects to.
    pub fn hostname(&self) -> &str {
        &self.shared.config.host
    }

    /// The installed policy.
    pub fn policy(&self) -> ClientPolicy {
        self.shared.policy()
    }

    /// Validate and install a policy.
    ///
    /// An open client disconnects so the new heartbeat windows take effect
    /// on the next connect.
    pub async fn set_policy(&self, policy: ClientPolicy) -> Result<()> {
        policy.validate()?;
        *self.shared.policy.lock().expect("policy poisoned") = policy;
        if self.is_open() {
            tracing::info!(client = %self.shared.label(), "policy reset, dropping connection");
            self.close().await;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(
            *self.shared.state.lock().expect("state poisoned"),
            LinkState::Open { .. }
        )
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Connect, running the socket work on the reactor thread.
    ///
    /// Idempotent: an open client returns immediately, and concurrent
    /// callers during `Initializing` all await the same post-connect signal.
    /// Attempts are bounded by the policy's retry budget, each attempt by
    /// its retry timeout, with jittered exponential backoff in between.
    pub async fn connect(&self) -> Result<()> {
        let mut ready = {
            let mut state = self.shared.state.lock().expect("state poisoned");
            match &*state {
                LinkState::Open { .. } => return Ok(()),
                LinkState::Initializing { ready, .. } => ready.clone(),
                LinkState::Closed => {
                    let (outbox, out_rx) = mpsc::channel(OUTBOX_CAPACITY);
                    let (ready_tx, ready_rx) = watch::channel(None);
                    *state = LinkState::Initializing {
                        outbox,
                        ready: ready_rx.clone(),
                    };
                    let shared = self.shared.clone();
                    if !self
                        .shared
                        .reactor
                        .queue(run_client(shared, out_rx, ready_tx))
                    {
                        *state = LinkState::Closed;
                        return Err(Error::Internal("reactor stopped".to_string()));
                    }
                    self.shared.record_state(ClientMetrics::STATE_INITIALIZING);
                    ready_rx
                }
            }
        };

        let result = match ready.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(Error::ConnectionFailed)),
            Err(_) => Err(Error::ConnectionFailed),
        };
        result
    }

    /// Queue one framed payload for delivery.
    ///
    /// Never blocks on I/O. Payloads queued while `Initializing` are flushed
    /// after the handshake, in submission order. Fails with
    /// `ConnectionFailed` when the client is `Closed` and with
    /// `ConnectionLost` when the bounded queue is full.
    pub fn send_message(&self, payload: Vec<u8>) -> Result<()> {
        let outbox = {
            match &*self.shared.state.lock().expect("state poisoned") {
                LinkState::Closed => return Err(Error::ConnectionFailed),
                LinkState::Initializing { outbox, .. } | LinkState::Open { outbox } => {
                    outbox.clone()
                }
            }
        };
        match outbox.try_send(Outbound::Message(payload)) {
            Ok(()) => {
                self.shared.reactor.wakeup();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::ConnectionLost("outbound queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ConnectionFailed),
        }
    }

    /// Register a listener for inbound payloads.
    pub fn add_listener(&self, listener: MessageListener) {
        self.shared
            .listeners
            .lock()
            .expect("listeners poisoned")
            .push(listener);
    }

    /// Attach instruments; the connection-state gauge tracks every
    /// transition from here on.
    pub(crate) fn set_metrics(&self, metrics: Arc<ClientMetrics>) {
        let state = match &*self.shared.state.lock().expect("state poisoned") {
            LinkState::Closed => ClientMetrics::STATE_CLOSED,
            LinkState::Initializing { .. } => ClientMetrics::STATE_INITIALIZING,
            LinkState::Open { .. } => ClientMetrics::STATE_OPEN,
        };
        metrics.update_connection_state(state);
        *self.shared.metrics.lock().expect("metrics poisoned") = Some(metrics);
    }

    /// Disconnect. Completes once the socket is closed and listeners have
    /// received the synthetic "client closed" message; a no-op on a closed
    /// client.
    pub async fn close(&self) {
        let outbox = {
            match &*self.shared.state.lock().expect("state poisoned") {
                LinkState::Closed => return,
                LinkState::Initializing { outbox, .. } | LinkState::Open { outbox } => {
                    outbox.clone()
                }
            }
        };
        let (tx, rx) = oneshot::channel();
        if outbox.send(Outbound::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Connection lifecycle, run on the reactor thread.
async fn run_client(
    shared: Arc<ClientShared>,
    out_rx: mpsc::Receiver<Outbound>,
    ready_tx: watch::Sender<Option<Result<()>>>,
) {
    let policy = shared.policy();
    let connection = match establish_with_retries(&shared, &policy).await {
        Ok(connection) => connection,
        Err(e) => {
            *shared.state.lock().expect("state poisoned") = LinkState::Closed;
            shared.record_state(ClientMetrics::STATE_CLOSED);
            tracing::warn!(client = %shared.label(), error = %e, "connect failed");
            let _ = ready_tx.send(Some(Err(e)));
            return;
        }
    };

    {
        let mut state = shared.state.lock().expect("state poisoned");
        if let LinkState::Initializing { outbox, .. } = &*state {
            let outbox = outbox.clone();
            *state = LinkState::Open { outbox };
        }
    }
    shared.record_state(ClientMetrics::STATE_OPEN);
    let _ = ready_tx.send(Some(Ok(())));
    tracing::info!(client = %shared.label(), transport = ?shared.config.kind, "connected");

    drive(shared, connection, out_rx, policy).await;
}

async fn establish_with_retries(
    shared: &ClientShared,
    policy: &ClientPolicy,
) -> Result<Connection> {
    let attempts = policy.retries() + 1;
    let mut last_error = Error::ConnectionFailed;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
        match tokio::time::timeout(
            policy.retry_timeout(),
            Connection::establish(&shared.config),
        )
        .await
        {
            Ok(Ok(connection)) => return Ok(connection),
            Ok(Err(e)) => {
                tracing::warn!(client = %shared.label(), attempt, error = %e, "connect attempt failed");
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(client = %shared.label(), attempt, "connect attempt timed out");
                last_error = Error::ConnectionFailed;
            }
        }
    }
    Err(last_error)
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = CONNECT_BACKOFF_BASE.as_millis() as u64;
    let capped = base
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(CONNECT_BACKOFF_CAP.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}

/// Event loop of one open connection: inbound decode, heartbeat clocks,
/// outbound drain.
async fn drive(
    shared: Arc<ClientShared>,
    mut connection: Connection,
    mut out_rx: mpsc::Receiver<Outbound>,
    policy: ClientPolicy,
) {
    enum Step {
        Inbound(Option<Result<Inbound>>),
        Outbound(Option<Outbound>),
        Tick,
    }

    let mut last_incoming = Instant::now();
    let mut last_outgoing = Instant::now();
    let mut tick = tokio::time::interval(HEARTBEAT_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let reason = loop {
        let step = tokio::select! {
            inbound = connection.next_event() => Step::Inbound(inbound),
            outbound = out_rx.recv() => Step::Outbound(outbound),
            _ = tick.tick() => Step::Tick,
        };
        match step {
            Step::Inbound(Some(Ok(Inbound::Message(payload)))) => {
                last_incoming = Instant::now();
                shared.emit(&payload);
            }
            Step::Inbound(Some(Ok(Inbound::Keepalive))) => {
                last_incoming = Instant::now();
            }
            Step::Inbound(Some(Err(e))) => break e.to_string(),
            Step::Inbound(None) => break "closed by peer".to_string(),
            Step::Outbound(Some(Outbound::Message(payload))) => {
                if let Err(e) = connection.send(payload).await {
                    break e.to_string();
                }
                last_outgoing = Instant::now();
            }
            Step::Outbound(Some(Outbound::Close(done))) => {
                connection.shutdown().await;
                finish_closed(&shared, CLIENT_CLOSED);
                let _ = done.send(());
                return;
            }
            Step::Outbound(None) => {
                connection.shutdown().await;
                finish_closed(&shared, CLIENT_CLOSED);
                return;
            }
            Step::Tick => {
                if let Some(window) = policy.incoming_heartbeat() {
                    if last_incoming.elapsed() > window {
                        break HEARTBEAT_EXCEEDED.to_string();
                    }
                }
                if let Some(window) = policy.outgoing_heartbeat() {
                    if last_outgoing.elapsed() > window {
                        if let Err(e) = connection.send_heartbeat().await {
                            break e.to_string();
                        }
                        last_outgoing = Instant::now();
                    }
                }
            }
        }
    };

    tracing::warn!(client = %shared.label(), %reason, "disconnected");
    connection.shutdown().await;
    finish_closed(&shared, &reason);
}

/// Return to `Closed` and fan the disconnect out to listeners as a
/// synthetic null-id error, so the tracker sees it for in-flight calls.
fn finish_closed(shared: &ClientShared, reason: &str) {
    *shared.state.lock().expect("state poisoned") = LinkState::Closed;
    shared.record_state(ClientMetrics::STATE_CLOSED);
    let payload = codec::encode(&JsonRpcResponse::issue(JsonRpcErrorData::connection_closed(
        reason,
    )))
    .unwrap_or_default();
    shared.emit(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let late = backoff_delay(30);
        assert!(late >= Duration::from_secs(5));
        assert!(late <= Duration::from_millis(6250));
    }
}
