//! In-process stream transport.
//!
//! Behaves like one Redis stream pair with a single consumer group: entries
//! get increasing ids, reads hand out each entry once, and unacknowledged
//! entries stay pending until `reclaim` finds them idle long enough. Publish
//! and DLQ failures can be injected.

use crate::transport::{StreamReader, StreamTransport};
use crate::{DlqEntry, EventEnvelope, StreamEntry, StreamError, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    next_seq: u64,
    stream: VecDeque<(u64, StreamEntry)>,
    dlq: Vec<StreamEntry>,
    stream_maxlen: Option<usize>,
    /// Highest sequence handed out to the group.
    delivered_seq: u64,
    /// Delivered, unacknowledged entries keyed by id, with their last delivery time.
    pending: BTreeMap<String, Pending>,
    acked: Vec<String>,
    fail_publish: bool,
    fail_publish_next: u32,
    fail_dlq: bool,
    fail_ping: bool,
    publish_calls: u64,
    dlq_calls: u64,
}

struct Pending {
    seq: u64,
    entry: StreamEntry,
    delivered_at: Instant,
}

impl State {
    fn next_id(&mut self) -> (u64, String) {
        self.next_seq += 1;
        (self.next_seq, format!("{}-0", self.next_seq))
    }
}

/// Shared-state in-memory transport. Clones see the same stream.
#[derive(Clone, Default)]
pub struct InMemoryStreamTransport {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
}

impl InMemoryStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the main stream at `maxlen` entries, dropping the oldest.
    pub fn with_maxlen(maxlen: usize) -> Self {
        let transport = Self::default();
        transport.state.lock().stream_maxlen = Some(maxlen);
        transport
    }

    /// Make every publish fail until cleared.
    pub fn set_fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.lock().fail_publish_next = count;
    }

    /// Make every DLQ append fail until cleared.
    pub fn set_fail_dlq(&self, fail: bool) {
        self.state.lock().fail_dlq = fail;
    }

    /// Make ping fail until cleared.
    pub fn set_fail_ping(&self, fail: bool) {
        self.state.lock().fail_ping = fail;
    }

    /// Append raw fields to the main stream, bypassing failure injection.
    pub fn push_raw(&self, fields: Vec<(String, String)>) -> String {
        let id = {
            let mut state = self.state.lock();
            push_entry(&mut state, fields)
        };
        self.appended.notify_waiters();
        id
    }

    /// Entries currently in the main stream, oldest first.
    pub fn entries(&self) -> Vec<StreamEntry> {
        self.state
            .lock()
            .stream
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Decoded envelopes in the main stream. Entries that fail to decode are
    /// skipped.
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.entries()
            .iter()
            .filter_map(|entry| EventEnvelope::from_entry(entry).ok())
            .collect()
    }

    pub fn dlq_entries(&self) -> Vec<StreamEntry> {
        self.state.lock().dlq.clone()
    }

    /// Decoded dead-letter records.
    pub fn dlq_records(&self) -> Vec<DlqEntry> {
        self.dlq_entries()
            .iter()
            .filter_map(|entry| DlqEntry::from_entry(entry).ok())
            .collect()
    }

    /// Number of publish attempts, failed ones included.
    pub fn publish_calls(&self) -> u64 {
        self.state.lock().publish_calls
    }

    /// Number of DLQ append attempts, failed ones included.
    pub fn dlq_calls(&self) -> u64 {
        self.state.lock().dlq_calls
    }

    /// Ids delivered to the group and not yet acknowledged.
    pub fn pending_ids(&self) -> Vec<String> {
        self.state.lock().pending.keys().cloned().collect()
    }

    /// Ids acknowledged so far, in order.
    pub fn acked_ids(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    fn take_batch(&self, count: usize) -> Vec<StreamEntry> {
        let mut state = self.state.lock();
        let delivered_seq = state.delivered_seq;
        let fresh: Vec<(u64, StreamEntry)> = state
            .stream
            .iter()
            .filter(|(seq, _)| *seq > delivered_seq)
            .take(count)
            .cloned()
            .collect();

        let now = Instant::now();
        let mut batch = Vec::with_capacity(fresh.len());
        for (seq, entry) in fresh {
            state.delivered_seq = seq;
            state.pending.insert(
                entry.id.clone(),
                Pending {
                    seq,
                    entry: entry.clone(),
                    delivered_at: now,
                },
            );
            batch.push(entry);
        }

        batch
    }
}

fn push_entry(state: &mut State, fields: Vec<(String, String)>) -> String {
    let (seq, id) = state.next_id();
    state.stream.push_back((seq, StreamEntry::new(id.clone(), fields)));
    if let Some(maxlen) = state.stream_maxlen {
        while state.stream.len() > maxlen {
            state.stream.pop_front();
        }
    }
    id
}

#[async_trait]
impl StreamTransport for InMemoryStreamTransport {
    async fn append(&self, envelope: &EventEnvelope) -> StreamResult<String> {
        let fields = envelope.to_fields()?;
        let id = {
            let mut state = self.state.lock();
            state.publish_calls += 1;
            if state.fail_publish_next > 0 {
                state.fail_publish_next -= 1;
                return Err(StreamError::Unavailable("injected publish failure".to_string()));
            }
            if state.fail_publish {
                return Err(StreamError::Unavailable("injected publish failure".to_string()));
            }
            push_entry(&mut state, fields)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn append_dlq(&self, entry: &DlqEntry) -> StreamResult<String> {
        let fields = entry.to_fields()?;
        let mut state = self.state.lock();
        state.dlq_calls += 1;
        if state.fail_dlq {
            return Err(StreamError::Unavailable("injected DLQ failure".to_string()));
        }
        let (_, id) = state.next_id();
        state.dlq.push(StreamEntry::new(id.clone(), fields));
        Ok(id)
    }

    async fn ping(&self) -> StreamResult<()> {
        if self.state.lock().fail_ping {
            return Err(StreamError::Unavailable("injected ping failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamReader for InMemoryStreamTransport {
    async fn read(&self, count: usize, block: Duration) -> StreamResult<Vec<StreamEntry>> {
        let count = count.max(1);
        let notified = self.appended.notified();
        let batch = self.take_batch(count);
        if !batch.is_empty() || block.is_zero() {
            return Ok(batch);
        }

        // Registered before the check above, so an append in between is not missed.
        let _ = tokio::time::timeout(block, notified).await;
        Ok(self.take_batch(count))
    }

    async fn reclaim(&self, min_idle: Duration, count: usize) -> StreamResult<Vec<StreamEntry>> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let mut idle: Vec<&mut Pending> = state
            .pending
            .values_mut()
            .filter(|p| now.duration_since(p.delivered_at) >= min_idle)
            .collect();
        idle.sort_by_key(|p| p.seq);

        Ok(idle
            .into_iter()
            .take(count.max(1))
            .map(|p| {
                p.delivered_at = now;
                p.entry.clone()
            })
            .collect())
    }

    async fn ack(&self, entry_id: &str) -> StreamResult<()> {
        let mut state = self.state.lock();
        if state.pending.remove(entry_id).is_some() {
            state.acked.push(entry_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(n: u32) -> EventEnvelope {
        EventEnvelope::new(
            Uuid::new_v4(),
            "user.created.v1",
            "user",
            format!("u-{}", n),
            "default",
            json!({"n": n}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_append_and_read_once() {
        let transport = InMemoryStreamTransport::new();
        transport.append(&envelope(1)).await.unwrap();
        transport.append(&envelope(2)).await.unwrap();

        let first = transport.read(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "1-0");

        let second = transport.read(10, Duration::ZERO).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(transport.pending_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_ack_and_reclaim() {
        let transport = InMemoryStreamTransport::new();
        transport.append(&envelope(1)).await.unwrap();
        transport.append(&envelope(2)).await.unwrap();

        let batch = transport.read(10, Duration::ZERO).await.unwrap();
        transport.ack(&batch[0].id).await.unwrap();

        // New reads never hand out a pending entry again.
        assert!(transport.read(10, Duration::ZERO).await.unwrap().is_empty());

        let again = transport.reclaim(Duration::ZERO, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, batch[1].id);
        assert_eq!(transport.pending_ids(), vec![batch[1].id.clone()]);
        assert_eq!(transport.acked_ids(), vec![batch[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_reclaim_waits_for_min_idle() {
        let transport = InMemoryStreamTransport::new();
        transport.append(&envelope(1)).await.unwrap();
        transport.read(10, Duration::ZERO).await.unwrap();

        let idle = Duration::from_millis(30);
        assert!(transport.reclaim(idle, 10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(transport.reclaim(idle, 10).await.unwrap().len(), 1);

        // Reclaiming resets the idle clock.
        assert!(transport.reclaim(idle, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let transport = InMemoryStreamTransport::new();
        transport.fail_next_publishes(1);
        assert!(transport.append(&envelope(1)).await.is_err());
        assert!(transport.append(&envelope(2)).await.is_ok());

        transport.set_fail_publish(true);
        assert!(transport.append(&envelope(3)).await.is_err());
        assert_eq!(transport.entries().len(), 1);
        assert_eq!(transport.publish_calls(), 3);

        transport.set_fail_ping(true);
        assert!(transport.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_maxlen_trims_oldest() {
        let transport = InMemoryStreamTransport::with_maxlen(2);
        for n in 0..5 {
            transport.append(&envelope(n)).await.unwrap();
        }
        let ids: Vec<String> = transport.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["4-0", "5-0"]);
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let transport = InMemoryStreamTransport::new();
        let writer = transport.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(&envelope(1)).await.unwrap();
        });

        let batch = transport.read(1, Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
