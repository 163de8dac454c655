//! JSON-RPC 2.0 message types.
//!
//! Host agents speak plain JSON-RPC 2.0: requests carry an `id` used to
//! correlate the eventual response, notifications carry none and are never
//! answered, and responses hold exactly one of `result` or `error`. A
//! response whose `id` is null is a protocol-level fault raised by the peer
//! (or synthesized locally on disconnect) rather than the answer to any
//! particular request; see [`JsonRpcResponse::is_issue`].

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved notification method used as a liveness signal on framings that
/// have no transport-level ping (the length-prefixed binary framing).
pub const HEARTBEAT_METHOD: &str = "heartbeat";

/// Request identifier.
///
/// Generated ids are monotonically increasing strings unique per client, but
/// the wire format also admits numeric ids from peers and `null` for
/// protocol-level faults. Serialized untagged, directly as the inner value.
///
/// `Hash`/`Eq` are implemented so ids can key the in-flight call maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier, the form this client generates.
    String(String),
    /// Numeric identifier, accepted from peers.
    Number(i64),
    /// Null identifier, only meaningful on issue responses.
    Null,
}

impl Id {
    /// True for the null id carried by protocol-level faults.
    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "{}", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

/// A method call that expects a response with a matching `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Name of the remote method.
    pub method: String,
    /// Method parameters; omitted from the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Correlation id for the response.
    pub id: Id,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A fire-and-forget call; carries no `id` and is never tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Name of the method or event.
    pub method: String,
    /// Event payload; omitted from the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    /// The liveness notification sent when the outgoing heartbeat expires.
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT_METHOD, None)
    }

    /// True when this is the reserved heartbeat notification.
    pub fn is_heartbeat(&self) -> bool {
        self.method == HEARTBEAT_METHOD
    }
}

/// The answer to a request, or a protocol-level fault when `id` is null.
///
/// Exactly one of `result` and `error` is present, enforced by the
/// constructors. The `id` matches the originating request except on issue
/// responses, where it is [`Id::Null`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Successful result; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure details; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    /// Correlation id, or null for protocol-level faults.
    pub id: Id,
}

impl JsonRpcResponse {
    pub fn success(result: serde_json::Value, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcErrorData, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// A fault not tied to any request, delivered to every in-flight call of
    /// the originating client.
    pub fn issue(error: JsonRpcErrorData) -> Self {
        Self::error(error, Id::Null)
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when this response is a protocol-level fault (null id).
    pub fn is_issue(&self) -> bool {
        self.id.is_null()
    }

    /// Collapse the response into the successful result value.
    ///
    /// Error responses become the matching [`crate::Error`] variant: the
    /// internal timeout code maps to `CallTimeout`, the connection-closed
    /// code to `ConnectionLost`, anything else to `JsonRpc`.
    pub fn into_result(self) -> crate::Result<serde_json::Value> {
        use crate::error::codes;
        if let Some(error) = self.error {
            return Err(match error.code {
                codes::REQUEST_TIMEOUT => crate::Error::CallTimeout,
                codes::CONNECTION_CLOSED => crate::Error::ConnectionLost(error.message),
                _ => crate::Error::JsonRpc(error),
            });
        }
        self.result
            .ok_or_else(|| crate::Error::DecodingFault("response carries neither result nor error".to_string()))
    }
}

/// Any message a peer may put on the wire.
///
/// Incoming bytes are decoded through this enum because the receiver cannot
/// know up front whether a payload is a response, a server-initiated
/// notification, or a batch. Batch elements stay raw so a malformed member
/// does not poison its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request; host agents do not normally send these to clients.
    Request(JsonRpcRequest),
    /// A server-initiated event or heartbeat.
    Notification(JsonRpcNotification),
    /// The answer to a tracked request, or an issue when the id is null.
    Response(JsonRpcResponse),
    /// A JSON array of messages, each decoded individually.
    Batch(Vec<serde_json::Value>),
}
