//! Error taxonomy for the serving core.
//!
//! Task-construction and registry failures are caught at the connection's
//! dispatch boundary and rendered as structured JSON error responses.
//! Transport-level conditions (timeouts, end-of-stream, oversized payloads)
//! close the connection instead and never reach this mapping.

use serde_json::{json, Value};
use thiserror::Error;

use crate::engine::EngineError;

/// Application-level failures with a defined HTTP status mapping.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Malformed or missing task fields, unknown task kind.
    #[error("{0}")]
    BadRequest(String),

    /// Duplicate session key on create.
    #[error("{0}")]
    Conflict(String),

    /// Operation against an absent session key.
    #[error("{0}")]
    NotFound(String),

    /// Body exceeds the configured limit. Surfaces as a connection-level
    /// rejection before a response is produced; kept in the taxonomy for
    /// callers embedding the registry directly.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Unexpected engine or I/O failure.
    #[error("{0}")]
    Internal(String),
}

impl ServeError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServeError::BadRequest(_) => 400,
            ServeError::NotFound(_) => 404,
            ServeError::Conflict(_) => 409,
            ServeError::PayloadTooLarge { .. } => 413,
            ServeError::Internal(_) => 500,
        }
    }

    /// JSON body written for this error.
    pub fn to_body(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

impl From<EngineError> for ServeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(msg) => ServeError::BadRequest(msg),
            other => ServeError::Internal(other.to_string()),
        }
    }
}
