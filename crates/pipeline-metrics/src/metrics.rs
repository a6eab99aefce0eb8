//! Pipeline counters.
//!
//! One [`PipelineMetrics`] value is created per process and shared by
//! `Arc` with the relay, the consumers and the health server.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Capacity of the recent-errors list.
pub const RECENT_ERRORS_CAPACITY: usize = 50;

/// One entry of the recent-errors list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentError {
    pub at: DateTime<Utc>,
    /// Component that reported the error (`relay`, `dlq`, `consumer:identity`, ...).
    pub source: String,
    pub event_id: Option<String>,
    pub message: String,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_published_total: BTreeMap<String, u64>,
    pub events_dlq_total: BTreeMap<String, u64>,
    pub outbox_backlog_current: u64,
    pub publish_success_total: u64,
    pub publish_failure_total: u64,
    pub last_publish_timestamp: Option<DateTime<Utc>>,
    /// Oldest first.
    pub recent_errors: Vec<RecentError>,
    /// Percentage of successful publish attempts; 100.0 before any attempt.
    pub success_rate: f64,
    pub events_applied_total: u64,
    pub events_duplicate_total: u64,
    pub events_skipped_total: u64,
    pub handler_failure_total: u64,
}

/// Shared metrics context for the relay and consumers.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    published_by_topic: Mutex<BTreeMap<String, u64>>,
    dlq_by_topic: Mutex<BTreeMap<String, u64>>,
    backlog: AtomicU64,
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    last_publish: Mutex<Option<DateTime<Utc>>>,
    recent_errors: Mutex<VecDeque<RecentError>>,
    applied: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    handler_failures: AtomicU64,
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, topic: &str) {
    *map.lock().entry(topic.to_string()).or_insert(0) += 1;
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful stream append for `topic`.
    pub fn record_publish_success(&self, topic: &str, at: DateTime<Utc>) {
        self.publish_success.fetch_add(1, Ordering::Relaxed);
        bump(&self.published_by_topic, topic);
        let mut last = self.last_publish.lock();
        if last.map_or(true, |prev| at > prev) {
            *last = Some(at);
        }
    }

    /// Count a failed stream append and remember the error.
    pub fn record_publish_failure(&self, event_id: &str, message: &str, at: DateTime<Utc>) {
        self.publish_failure.fetch_add(1, Ordering::Relaxed);
        self.record_error("relay", Some(event_id), message, at);
    }

    /// Count an event moved to the dead-letter stream.
    pub fn record_dead_letter(&self, topic: &str) {
        bump(&self.dlq_by_topic, topic);
    }

    /// Replace the backlog gauge.
    pub fn set_backlog(&self, backlog: u64) {
        self.backlog.store(backlog, Ordering::Relaxed);
    }

    pub fn backlog(&self) -> u64 {
        self.backlog.load(Ordering::Relaxed)
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a consumer dispatch failure and remember the error.
    pub fn record_handler_failure(&self, domain: &str, event_id: Option<&str>, message: &str) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        self.record_error(&format!("consumer:{}", domain), event_id, message, Utc::now());
    }

    /// Append to the bounded recent-errors list, evicting the oldest entry.
    pub fn record_error(&self, source: &str, event_id: Option<&str>, message: &str, at: DateTime<Utc>) {
        let mut errors = self.recent_errors.lock();
        if errors.len() >= RECENT_ERRORS_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(RecentError {
            at,
            source: source.to_string(),
            event_id: event_id.map(str::to_string),
            message: message.to_string(),
        });
    }

    /// Successful publish attempts as a percentage of all attempts.
    pub fn success_rate(&self) -> f64 {
        let success = self.publish_success.load(Ordering::Relaxed);
        let failure = self.publish_failure.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            return 100.0;
        }
        success as f64 / total as f64 * 100.0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published_total: self.published_by_topic.lock().clone(),
            events_dlq_total: self.dlq_by_topic.lock().clone(),
            outbox_backlog_current: self.backlog(),
            publish_success_total: self.publish_success.load(Ordering::Relaxed),
            publish_failure_total: self.publish_failure.load(Ordering::Relaxed),
            last_publish_timestamp: *self.last_publish.lock(),
            recent_errors: self.recent_errors.lock().iter().cloned().collect(),
            success_rate: self.success_rate(),
            events_applied_total: self.applied.load(Ordering::Relaxed),
            events_duplicate_total: self.duplicates.load(Ordering::Relaxed),
            events_skipped_total: self.skipped.load(Ordering::Relaxed),
            handler_failure_total: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. The backlog gauge is kept; the sampler owns it.
    pub fn reset(&self) {
        self.published_by_topic.lock().clear();
        self.dlq_by_topic.lock().clear();
        self.publish_success.store(0, Ordering::Relaxed);
        self.publish_failure.store(0, Ordering::Relaxed);
        *self.last_publish.lock() = None;
        self.recent_errors.lock().clear();
        self.applied.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.handler_failures.store(0, Ordering::Relaxed);
        debug!("Pipeline metrics reset");
    }
}
