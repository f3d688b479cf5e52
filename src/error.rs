//! Error types for the chat client
//!
//! Defines session-level errors, transport errors and the structured
//! API error reported by the server. Uses thiserror for ergonomic error
//! definitions.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::CallId;

/// Session-level errors
///
/// Every `call` ends in either a payload or one of these. Cloneable so a
/// single disconnect can fail every pending call with the same error.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Socket-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or unexpected frame contents
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Business error reported by the server for a single call
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Call attempted while the session is not open
    #[error("Not connected")]
    NotConnected,

    /// Connect attempted while a connection is live
    #[error("Already connected")]
    AlreadyConnected,

    /// Synthetic error used to fail pending calls when the connection closes
    #[error("Connection closed")]
    ConnectionClosed,

    /// A call id was registered twice
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(CallId),

    /// The session actor is no longer running
    #[error("Session stopped")]
    SessionStopped,
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol(err.to_string())
    }
}

/// Socket transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish the websocket connection
    #[error("Connect failed: {0}")]
    Connect(String),

    /// WebSocket protocol error on a live connection
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Socket already closed
    #[error("Socket closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

/// Structured error from a server `error` payload
///
/// Missing fields default to empty/absent values rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Numeric error code (`error` on the wire)
    #[serde(rename = "error", default, deserialize_with = "deserialize_code")]
    pub code: Option<i64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "errorType", default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Accepts `403`, `"403"`, or a non-numeric string code (mapped to `None`)
fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
