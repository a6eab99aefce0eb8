//! Scenario tests for the relay.
//!
//! - `harness.rs`     - in-memory database + stream fixture
//! - `publish.rs`     - happy path, ordering, never-reselected
//! - `retry.rs`       - backoff schedule and dead-lettering
//! - `concurrency.rs` - replicas on one database, lease expiry
//! - `shutdown.rs`    - run loop lifecycle

mod concurrency;
mod retry;
