//! Transport traits.

use crate::{DlqEntry, EventEnvelope, StreamEntry, StreamResult};
use async_trait::async_trait;
use std::time::Duration;

/// Append side of the stream, used by the relay.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Append an envelope to the main stream. Returns the entry id.
    async fn append(&self, envelope: &EventEnvelope) -> StreamResult<String>;

    /// Append a record to the dead-letter stream. Returns the entry id.
    async fn append_dlq(&self, entry: &DlqEntry) -> StreamResult<String>;

    /// Check that the transport is reachable.
    async fn ping(&self) -> StreamResult<()>;
}

/// Consumer-group read side of the stream.
#[async_trait]
pub trait StreamReader: Send + Sync {
    /// Read up to `count` entries not yet delivered to this group, waiting
    /// at most `block` for one to arrive. An empty vec means the wait timed
    /// out.
    async fn read(&self, count: usize, block: Duration) -> StreamResult<Vec<StreamEntry>>;

    /// Take over up to `count` entries that were delivered to this group but
    /// left unacknowledged for at least `min_idle`. Reclaimed entries count
    /// as freshly delivered, so they are not handed out again until they sit
    /// idle for another `min_idle`.
    async fn reclaim(&self, min_idle: Duration, count: usize) -> StreamResult<Vec<StreamEntry>>;

    /// Acknowledge an entry so it is not redelivered.
    async fn ack(&self, entry_id: &str) -> StreamResult<()>;
}
