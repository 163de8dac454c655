//! Error model.
//!
//! Two layers: [`Error`] is the application-level enum threaded through every
//! fallible operation, [`JsonRpcErrorData`] is the wire-format error object
//! that appears inside responses. Synchronous faults (encoding, duplicate
//! ids, submitting against a closed client) surface as `Err` to the caller;
//! asynchronous faults complete the pending call's future with an
//! error-bearing response built from [`JsonRpcErrorData`].
//!
//! Standard JSON-RPC 2.0 codes occupy −32700…−32603. The implementation range
//! is used for faults raised by this runtime itself, see [`codes`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the virtlink crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON is valid but not a well-formed message.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The requested method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// The method exists but the parameters are wrong.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unspecified server-side failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Retries exhausted without a response; raised by the tracker.
    pub const REQUEST_TIMEOUT: i32 = -32000;
    /// The connection dropped or was closed with calls in flight.
    pub const CONNECTION_CLOSED: i32 = -32001;
}

/// Application-level error for client operations.
///
/// Cloneable so a single fault can be fanned out to every in-flight call of
/// a client during issue dispatch.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An error object received from (or destined for) the wire.
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// Socket open or transport handshake failed; retryable per policy.
    #[error("connection failed")]
    ConnectionFailed,

    /// Mid-session I/O failure, heartbeat expiry, or backpressure overflow.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Request serialization failed before anything was sent or tracked.
    #[error("encoding fault: {0}")]
    EncodingFault(String),

    /// Inbound stream corruption; the client closes as a consequence.
    #[error("decoding fault: {0}")]
    DecodingFault(String),

    /// A request with this id is already tracked.
    #[error("request already in flight: {0}")]
    RequestAlreadyInFlight(String),

    /// Retries exhausted without a response.
    #[error("call timed out")]
    CallTimeout,

    /// The client was closed by the caller or shut down with the reactor.
    #[error("client closed")]
    ClientClosed,

    /// A fault in the runtime itself rather than the connection.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON-RPC 2.0 error object, the exact wire format inside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code; see [`codes`].
    pub code: i32,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, msg)
    }

    /// The error the tracker delivers when a call's retries are exhausted.
    pub fn request_timeout() -> Self {
        Self::new(codes::REQUEST_TIMEOUT, "Request timed out")
    }

    /// The error synthesized on disconnect and fanned out to in-flight calls.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::new(codes::CONNECTION_CLOSED, reason)
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_codes_sit_in_the_implementation_range() {
        assert_eq!(JsonRpcErrorData::request_timeout().code, -32000);
        assert_eq!(JsonRpcErrorData::connection_closed("x").code, -32001);
    }

    #[test]
    fn error_data_round_trips() {
        let err = JsonRpcErrorData::with_data(
            codes::INVALID_PARAMS,
            "missing field",
            serde_json::json!({"field": "vmId"}),
        );
        let json = serde_json::to_string(&err).unwrap();
        let back: JsonRpcErrorData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = JsonRpcErrorData::connection_closed("heartbeat exceeded");
        let shown = err.to_string();
        assert!(shown.contains("-32001"));
        assert!(shown.contains("heartbeat exceeded"));
    }

    #[test]
    fn errors_are_cloneable_for_issue_dispatch() {
        let err = Error::ConnectionLost("peer went away".to_string());
        let copy = err.clone();
        assert!(matches!(copy, Error::ConnectionLost(_)));
    }
}
