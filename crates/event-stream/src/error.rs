//! Error types for stream transports.

use thiserror::Error;

/// Stream error type.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Unexpected reply shape from the stream server
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A required entry field is absent
    #[error("Stream entry missing field: {0}")]
    MissingField(&'static str),

    /// An entry field could not be decoded
    #[error("Invalid stream field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport is not accepting appends
    #[error("Stream unavailable: {0}")]
    Unavailable(String),
}

impl StreamError {
    pub(crate) fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
