//! Virtlink: JSON-RPC 2.0 client runtime for virtualization host agents.
//!
//! This is the convenience crate re-exporting the virtlink sub-crates:
//!
//! - **virtlink-core**: JSON-RPC 2.0 types, codec, error model, logging.
//! - **virtlink-client**: the reactor, transports, call tracker and client
//!   facade.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use virtlink::{ClientPolicy, JsonRpcClient, Reactor, ResponseTracker, TransportKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> virtlink::Result<()> {
//!     let reactor = Reactor::new("engine")?;
//!     let tracker = ResponseTracker::new();
//!     let client = reactor.create_client(TransportKind::WebSocket, "kvm-host-7", 54321)?;
//!     let rpc = JsonRpcClient::new(client, tracker, ClientPolicy::new(1, Duration::from_secs(30)))?;
//!
//!     let response = rpc.request("Host.ping", None).await?.await?;
//!     println!("{:?}", response.into_result()?);
//!     Ok(())
//! }
//! ```

pub use virtlink_client as client;
pub use virtlink_core as core;

pub use virtlink_client::{
    ClientPolicy, JsonRpcClient, Reactor, ReactorClient, ResponseTracker, TlsConfig, TransportKind,
};
pub use virtlink_core::{Error, Id, JsonRpcRequest, JsonRpcResponse, Result};
