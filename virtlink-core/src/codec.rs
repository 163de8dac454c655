//! JSON encoding and decoding of JSON-RPC messages.
//!
//! The transport layer deals in whole byte payloads, so everything here
//! encodes to and decodes from `Vec<u8>`/`&[u8]`. Decoding goes through a
//! generic value first to detect batches: a JSON array is returned as
//! [`JsonRpcMessage::Batch`] with its members still raw, because each member
//! is decoded (and may fail) independently.

use crate::error::{Error, Result};
use crate::types::{JsonRpcMessage, JsonRpcRequest};
use serde::{Deserialize, Serialize};

/// Encode any serializable message to its wire bytes.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(|e| Error::EncodingFault(e.to_string()))
}

/// Encode a batch of requests as a single JSON array payload.
pub fn encode_batch(requests: &[JsonRpcRequest]) -> Result<Vec<u8>> {
    if requests.is_empty() {
        return Err(Error::EncodingFault("batch cannot be empty".to_string()));
    }
    serde_json::to_vec(requests).map_err(|e| Error::EncodingFault(e.to_string()))
}

/// Decode an inbound payload into a message, detecting batches.
///
/// Corrupt payloads are a [`Error::DecodingFault`]; the connection carrying
/// them is closed by the caller.
pub fn decode(data: &[u8]) -> Result<JsonRpcMessage> {
    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(|e| Error::DecodingFault(e.to_string()))?;

    if value.is_array() {
        let members: Vec<serde_json::Value> =
            serde_json::from_value(value).map_err(|e| Error::DecodingFault(e.to_string()))?;
        if members.is_empty() {
            return Err(Error::DecodingFault("empty batch".to_string()));
        }
        Ok(JsonRpcMessage::Batch(members))
    } else {
        serde_json::from_value(value).map_err(|e| Error::DecodingFault(e.to_string()))
    }
}

/// Decode a payload directly into a known type.
pub fn decode_as<'de, T: Deserialize<'de>>(data: &'de [u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::DecodingFault(e.to_string()))
}
