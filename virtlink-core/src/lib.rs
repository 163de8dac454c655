//! Core JSON-RPC 2.0 types and codec for virtlink.
//!
//! This crate is the transport-agnostic foundation of the virtlink client
//! runtime: message types, wire codec, the error model shared by every
//! crate, and tracing subscriber setup. The `virtlink-client` crate builds
//! the reactor, transports and call tracking on top of it.
//!
//! # Example
//!
//! ```rust
//! use virtlink_core::{codec, Id, JsonRpcRequest};
//!
//! let request = JsonRpcRequest::new(
//!     "Host.getStats",
//!     Some(serde_json::json!({"detail": true})),
//!     Id::from("1-1"),
//! );
//! let bytes = codec::encode(&request).unwrap();
//! let decoded: JsonRpcRequest = codec::decode_as(&bytes).unwrap();
//! assert_eq!(decoded.method, "Host.getStats");
//! ```

pub mod codec;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, JsonRpcErrorData, Result};
pub use logging::init_logging;
pub use types::{
    Id, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, HEARTBEAT_METHOD,
};
