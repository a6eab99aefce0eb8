//! Error types for the relay.

use thiserror::Error;

/// Relay error type.
///
/// Only infrastructure failures surface here. Per-row publish failures are
/// recorded on the row and in metrics instead.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Outbox database unreachable or a query failed
    #[error("Database error: {0}")]
    Database(#[from] outbox_database::DatabaseError),

    /// Stream transport error outside per-row publishing
    #[error("Stream error: {0}")]
    Stream(#[from] event_stream::StreamError),

    /// Invalid relay configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
