//! # Outbox relay
//!
//! Polls the outbox table and moves events to the stream.
//!
//! ## Row lifecycle
//!
//! ```text
//! pending ──claim──▶ publish ──ok──▶ published (terminal)
//!    ▲                  │
//!    │                 err
//!    │                  ▼
//!    └── backoff ◀── attempts < max
//!                       │
//!                  attempts ≥ max ──▶ DLQ append ──ok──▶ dead-lettered (terminal)
//!                                         │
//!                                        err ──▶ retried on a later cycle
//! ```
//!
//! The retry delay is `retry_base_delay * 2^(attempts - 1)`. When the DLQ
//! append itself fails the attempt count is stored as is and a later cycle
//! retries only the DLQ step; the event is not republished.
//!
//! ## Example
//!
//! ```ignore
//! let relay = Relay::new(db, transport, metrics, RelayConfig::from_config(&config))?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! tokio::spawn(async move { relay.run(shutdown_rx).await });
//! ```

mod backoff;
mod config;
mod error;
mod relay;

#[cfg(test)]
mod tests;

pub use backoff::{backoff_delay, next_attempt_at};
pub use config::{new_relay_id, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use relay::{BatchReport, Relay};
