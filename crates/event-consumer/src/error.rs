//! Consumer error types.

use event_stream::StreamError;
use outbox_database::{rusqlite, DatabaseError};
use thiserror::Error;

/// Error returned by an [`EventHandler`](crate::EventHandler).
///
/// Any handler error rolls back the event's transaction.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Failed(String),
}

impl From<rusqlite::Error> for HandlerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

/// Consumer errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The handler failed; nothing was written and the entry stays
    /// redeliverable.
    #[error("Handler for {event_type} failed on event {event_id}: {message}")]
    HandlerFailure {
        event_id: String,
        event_type: String,
        message: String,
    },

    /// The entry or its payload could not be decoded.
    #[error("Malformed event {event_id}: {message}")]
    MalformedPayload { event_id: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Handler already registered for {0}")]
    DuplicateHandler(String),
}

impl DispatchError {
    pub(crate) fn from_handler(event_id: String, event_type: &str, err: HandlerError) -> Self {
        match err {
            HandlerError::MalformedPayload(message) => Self::MalformedPayload { event_id, message },
            other => Self::HandlerFailure {
                event_id,
                event_type: event_type.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Event id the failure concerns, when known.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::HandlerFailure { event_id, .. } | Self::MalformedPayload { event_id, .. } => {
                Some(event_id)
            }
            _ => None,
        }
    }
}

/// Result type for consumer operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
