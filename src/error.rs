//! Error types for the session layer.
//!
//! Two families live here:
//!
//! - [`SessionError`] covers transport and configuration failures inside the
//!   engine. These never reach a caller directly; they drive state changes
//!   and diagnostics.
//! - [`CallError`] is the outcome of a single call. It is `Clone` and
//!   serializable so it can cross the proxy/bridge boundary inside a reply
//!   envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::RpcErrorObject;

/// Main error type for engine-level operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket handshake or framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Malformed or unexpected inbound frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The configured endpoint is not a usable WebSocket URL.
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The connection attempt did not complete in time.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Outbound queue is full.
    #[error("Write queue full")]
    QueueFull,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::WebSocket(Box::new(err))
    }
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Outcome of a failed call, as seen by the code that issued it.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CallError {
    /// The engine was not `open` when the call was issued.
    #[error("not connected")]
    NotConnected,

    /// The connection left `open` before the reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The backend answered with an error object.
    #[error("{0}")]
    Remote(RpcErrorObject),

    /// The consumer was detached (or destroyed) before or while calling.
    #[error("consumer detached")]
    Detached,

    /// The outbound queue had no room for the frame.
    #[error("write queue full")]
    QueueFull,

    /// Params were rejected locally before sending.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Params could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The backend answered this call with an unreadable reply.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl CallError {
    /// True for failures caused by the connection rather than the call.
    pub fn is_transport(&self) -> bool {
        matches!(self, CallError::NotConnected | CallError::ConnectionClosed)
    }
}

impl From<SessionError> for CallError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::QueueFull => CallError::QueueFull,
            SessionError::Json(e) => CallError::Encode(e.to_string()),
            _ => CallError::ConnectionClosed,
        }
    }
}
