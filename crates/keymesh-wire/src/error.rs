//! Errors from the wire protocol layer.

use crate::message::{error_value, map_field, HANDLER_FAILED};
use keymesh_types::KeymeshError;
use rmpv::Value;
use thiserror::Error;

/// Errors from connection setup and transport plumbing.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Identity error: {0}")]
    Identity(#[from] KeymeshError),
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for WireError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WireError::WebSocket(Box::new(e))
    }
}

/// Why an outbound call did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The channel closed before a response arrived, or was already closed.
    #[error("Connection closed")]
    ConnectionClosed,
    /// The request could not be serialized.
    #[error("Encode error: {0}")]
    Encode(String),
    /// The remote side answered with a failure envelope.
    #[error("Remote error: {0}")]
    Remote(Value),
    /// A reply for this call arrived but could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl CallError {
    /// Error code of a remote failure, when the payload carries one.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            CallError::Remote(value) => map_field(value, "code").and_then(Value::as_i64),
            _ => None,
        }
    }
}

/// Failure raised by a local method handler.
///
/// Sent back to the caller as `{ "code": .., "message": .. }`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Numeric error code sent to the caller.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

impl HandlerError {
    /// A handler failure with the generic [`HANDLER_FAILED`] code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: HANDLER_FAILED,
            message: message.into(),
        }
    }

    /// A handler failure with an application-chosen code.
    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wire payload for a failure envelope.
    pub fn to_value(&self) -> Value {
        error_value(self.code, self.message.clone())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
