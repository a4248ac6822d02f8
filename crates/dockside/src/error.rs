//! Error taxonomy for engine sessions.

use std::time::Duration;

use dockside_protocol::{ErrorResponse, ProtocolError};
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A caller-supplied argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation does not apply to the object's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The engine could not be reached, or the connection broke before a
    /// hijacked stream existed.
    #[error("cannot connect to engine at {endpoint}: {reason}")]
    Connection {
        /// Engine endpoint that was dialed.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// The session stream was malformed or failed underneath an established
    /// connection.
    #[error("session stream error: {0}")]
    Stream(#[from] ProtocolError),

    /// The engine rejected the request.
    #[error("engine rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the engine's error body.
        message: String,
    },

    /// The container or exec instance does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Message from the engine's error body.
        message: String,
    },

    /// The request did not complete within the configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A response body could not be decoded.
    #[error("invalid engine response: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Build the error for a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = ErrorResponse::from_body(body).message;
        if status == 404 {
            EngineError::NotFound { message }
        } else {
            EngineError::Rejected { status, message }
        }
    }

    /// Whether the error reports a malformed multiplexed stream.
    pub fn is_framing(&self) -> bool {
        matches!(self, EngineError::Stream(e) if e.is_framing())
    }

    /// Whether the error reports an unknown container or exec instance.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}
