//! Configuration, error types, and logging setup shared by the relay,
//! the consumers, and the health server.

mod config;
mod error;
mod logging;

pub use config::{
    Config, DatabaseLocation, DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_LEASE_SECS,
    DEFAULT_DLQ_MAXLEN, DEFAULT_DLQ_STREAM_NAME, DEFAULT_HEALTH_ADDR, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REDIS_URL,
    DEFAULT_RETRY_BASE_DELAY_SECS, DEFAULT_STREAM_MAXLEN, DEFAULT_STREAM_NAME,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
