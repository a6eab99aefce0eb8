//! SQLite storage for the transactional outbox pipeline.
//!
//! This crate provides:
//! - Schema migrations for the outbox and the identity read model
//! - [`OutboxWriter`], which appends events inside the caller's transaction
//! - Relay queries: leased batch claim and batched status updates
//! - Per-domain consumer ledgers
//! - An async executor ([`AsyncDatabase`]) running SQLite on a dedicated thread
//!
//! # Commit boundaries
//!
//! Nothing in this crate commits a transaction it did not open. Functions that
//! take a `&Transaction` or `&Connection` run inside whatever unit of work the
//! caller holds; the relay claim and update functions open and commit their
//! own `IMMEDIATE` transactions.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let writer = OutboxWriter::new();
//! let event_id = db.call(move |conn| {
//!     let tx = conn.transaction()?;
//!     tx.execute("UPDATE users SET email = ?1 WHERE id = ?2", params![email, id])?;
//!     let event_id = writer.user_updated(&tx, &snapshot)?;
//!     tx.commit()?;
//!     Ok(event_id)
//! }).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod timestamp;
mod writer;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
pub use timestamp::{format_timestamp, max_timestamp, parse_timestamp};
pub use writer::{OutboxWriter, UserSnapshot, USER_CREATED, USER_DISABLED, USER_UPDATED};

/// Re-export so callers can name transactions without a direct dependency.
pub use rusqlite;
