//! The reactor: one I/O thread multiplexing every client connection.
//!
//! A [`Reactor`] owns a dedicated OS thread running a current-thread tokio
//! runtime. Every socket, decoder buffer, outbound queue and heartbeat clock
//! lives in tasks on that thread, which keeps the per-connection state
//! machines free of locks: the loop thread is the only code that ever
//! touches a socket. Work that must run there (connects, closes, the
//! connection drivers themselves) is marshalled from caller threads with
//! [`Reactor::queue_future`] and awaited off-loop through the returned
//! [`ScheduledTask`].
//!
//! Shutting down drains the pending-task queue, disconnects every client
//! created through this reactor (their in-flight calls observe a synthetic
//! "client closed" fault), and exits the loop.

use crate::client::ReactorClient;
use crate::transport::{ConnectionConfig, TlsConfig, TransportKind, DEFAULT_MAX_FRAME};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, Notify};
use virtlink_core::{Error, Result};

type QueuedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

enum Control {
    Run(QueuedFuture),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct ReactorShared {
    name: String,
    control: mpsc::UnboundedSender<Control>,
    wake: Notify,
    clients: Mutex<Vec<ReactorClient>>,
    next_client_id: AtomicU64,
}

/// Cheap handle used by clients to reach their reactor.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    shared: Arc<ReactorShared>,
}

impl ReactorHandle {
    /// Enqueue a future onto the loop thread; false when the loop is gone.
    pub(crate) fn queue(&self, fut: impl Future<Output = ()> + Send + 'static) -> bool {
        let ok = self.shared.control.send(Control::Run(Box::pin(fut))).is_ok();
        self.shared.wake.notify_one();
        ok
    }

    pub(crate) fn wakeup(&self) {
        self.shared.wake.notify_one();
    }
}

/// Connection parameters for [`Reactor::create_client_with_options`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub max_frame: usize,
}

impl ClientOptions {
    pub fn new(kind: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            tls: None,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

/// Single-threaded event loop owning all client sockets.
pub struct Reactor {
    shared: Arc<ReactorShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Reactor {
    /// Spawn the loop thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ReactorShared {
            name: name.clone(),
            control: control_tx,
            wake: Notify::new(),
            clients: Mutex::new(Vec::new()),
            next_client_id: AtomicU64::new(1),
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("reactor runtime: {e}")))?;

        let loop_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("virtlink-reactor-{name}"))
            .spawn(move || run_loop(runtime, loop_shared, control_rx))
            .map_err(|e| Error::Internal(format!("reactor thread: {e}")))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Create a non-TLS client; the connection itself is deferred until
    /// [`ReactorClient::connect`] is called.
    pub fn create_client(
        &self,
        kind: TransportKind,
        host: impl Into<String>,
        port: u16,
    ) -> Result<ReactorClient> {
        self.create_client_with_options(ClientOptions::new(kind, host, port))
    }

    /// Create a TLS client with the given certificate material.
    pub fn create_client_with_tls(
        &self,
        kind: TransportKind,
        host: impl Into<String>,
        port: u16,
        tls: TlsConfig,
    ) -> Result<ReactorClient> {
        self.create_client_with_options(ClientOptions::new(kind, host, port).with_tls(tls))
    }

    /// Create a client with full control over the connection parameters.
    pub fn create_client_with_options(&self, options: ClientOptions) -> Result<ReactorClient> {
        if options.kind.uses_tls() && options.tls.is_none() {
            return Err(Error::Internal(format!(
                "{:?} transport requires a TlsConfig",
                options.kind
            )));
        }
        let config = ConnectionConfig {
            kind: options.kind,
            host: options.host,
            port: options.port,
            tls: options.tls,
            max_frame: options.max_frame,
        };
        let client_id = self.shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        let client = ReactorClient::new(
            ReactorHandle {
                shared: self.shared.clone(),
            },
            client_id,
            config,
        );
        self.shared
            .clients
            .lock()
            .expect("reactor client list poisoned")
            .push(client.clone());
        Ok(client)
    }

    /// Marshal a future onto the loop thread. Returns after enqueueing; the
    /// returned handle resolves with the future's output once it ran.
    pub fn queue_future<F, T>(&self, fut: F) -> ScheduledTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = ReactorHandle {
            shared: self.shared.clone(),
        };
        handle.queue(async move {
            let _ = tx.send(fut.await);
        });
        ScheduledTask { rx }
    }

    /// Unblock the loop if it is parked waiting for work.
    pub fn wakeup(&self) {
        self.shared.wake.notify_one();
    }

    /// Drain pending tasks, disconnect every client, stop the loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.control.send(Control::Shutdown(tx)).is_ok() {
            self.shared.wake.notify_one();
            let _ = rx.await;
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let (tx, _rx) = oneshot::channel();
        let _ = self.shared.control.send(Control::Shutdown(tx));
        self.shared.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Completion handle for a future queued onto the reactor.
pub struct ScheduledTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for ScheduledTask<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| Error::Internal("reactor stopped".to_string())))
    }
}

fn run_loop(
    runtime: tokio::runtime::Runtime,
    shared: Arc<ReactorShared>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        tracing::debug!(reactor = %shared.name, "reactor loop started");
        loop {
            tokio::select! {
                control_msg = control.recv() => match control_msg {
                    Some(Control::Run(fut)) => {
                        tokio::task::spawn_local(fut);
                    }
                    Some(Control::Shutdown(done)) => {
                        while let Ok(msg) = control.try_recv() {
                            if let Control::Run(fut) = msg {
                                tokio::task::spawn_local(fut);
                            }
                        }
                        disconnect_all(&shared).await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        disconnect_all(&shared).await;
                        break;
                    }
                },
                _ = shared.wake.notified() => {}
            }
        }
        tracing::debug!(reactor = %shared.name, "reactor loop stopped");
    });
}

async fn disconnect_all(shared: &ReactorShared) {
    let clients: Vec<ReactorClient> = shared
        .clients
        .lock()
        .expect("reactor client list poisoned")
        .drain(..)
        .collect();
    for client in clients {
        client.close().await;
    }
}
