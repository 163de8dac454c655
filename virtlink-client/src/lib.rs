//! Reactor-driven JSON-RPC 2.0 client for virtualization host agents.
//!
//! This crate implements the client runtime a management engine uses to
//! talk to host agents: a single-threaded [`Reactor`] multiplexing every
//! connection, pluggable transports (length-prefixed binary or WebSocket,
//! plain or TLS), asynchronous call tracking with per-call timeouts and
//! retries, and bidirectional heartbeats.
//!
//! # Architecture
//!
//! - [`Reactor`]: one I/O thread owning every socket; connects, closes and
//!   connection drivers are marshalled onto it.
//! - [`ReactorClient`]: one per connection; outbound queue, heartbeat
//!   clocks and the `Closed → Initializing → Open` state machine.
//! - [`ResponseTracker`]: one per process; correlates responses with
//!   in-flight calls, enforces deadlines, drives retries.
//! - [`JsonRpcClient`]: the thin facade callers hold.
//!
//! # Example
//!
//! ```rust,no_run
//! use virtlink_client::{ClientPolicy, JsonRpcClient, Reactor, ResponseTracker, TransportKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> virtlink_core::Result<()> {
//!     let reactor = Reactor::new("engine")?;
//!     let tracker = ResponseTracker::new();
//!
//!     let client = reactor.create_client(TransportKind::Plain, "kvm-host-7", 54321)?;
//!     client
//!         .set_policy(
//!             ClientPolicy::new(2, Duration::from_secs(30))
//!                 .with_incoming_heartbeat(Duration::from_secs(10))
//!                 .with_outgoing_heartbeat(Duration::from_secs(5)),
//!         )
//!         .await?;
//!
//!     let rpc = JsonRpcClient::new(client, tracker, ClientPolicy::new(2, Duration::from_secs(30)))?;
//!     let pending = rpc.request("Host.getCapabilities", None).await?;
//!     let response = pending.await?;
//!     println!("{:?}", response.into_result()?);
//!     Ok(())
//! }
//! ```

mod call;
mod client;
mod metrics;
mod notification;
mod policy;
mod reactor;
mod retry;
mod rpc;
mod tracker;
pub mod transport;

pub use call::{PendingBatch, PendingCall};
pub use client::{MessageListener, ReactorClient, CLIENT_CLOSED, HEARTBEAT_EXCEEDED};
pub use metrics::ClientMetrics;
pub use notification::{NotificationFn, NotificationHandler};
pub use policy::{ClientPolicy, DEFAULT_RETRY_TIMEOUT};
pub use reactor::{ClientOptions, Reactor, ScheduledTask};
pub use rpc::JsonRpcClient;
pub use tracker::{ResponseTracker, DEFAULT_POLL_INTERVAL};
pub use transport::{FrameCodec, TlsConfig, TransportKind, DEFAULT_MAX_FRAME};
