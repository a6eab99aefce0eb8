//! The relay loop.

use crate::backoff::next_attempt_at;
use crate::{RelayConfig, RelayResult};
use chrono::{DateTime, Utc};
use event_stream::{DlqEntry, EventEnvelope, StreamTransport};
use outbox_database::{queries, AsyncDatabase, OutboxEvent, OutboxUpdate};
use pipeline_metrics::PipelineMetrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Message recorded when a row reaches the DLQ step without a stored error.
const BUDGET_EXHAUSTED: &str = "retry budget exhausted";

/// What one relay cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub published: usize,
    pub retry_scheduled: usize,
    pub dead_lettered: usize,
    /// Rows whose DLQ append failed and will be retried.
    pub dead_letter_pending: usize,
    /// Rows whose status update was applied.
    pub updated: usize,
}

impl BatchReport {
    /// Nothing was claimed.
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }

    fn count(&mut self, update: &OutboxUpdate) {
        match update {
            OutboxUpdate::Published { .. } => self.published += 1,
            OutboxUpdate::RetryScheduled { .. } => self.retry_scheduled += 1,
            OutboxUpdate::DeadLettered { .. } => self.dead_lettered += 1,
            OutboxUpdate::DeadLetterPending { .. } => self.dead_letter_pending += 1,
        }
    }
}

/// Moves outbox rows to the stream.
///
/// Safe to run as several replicas against one database: each cycle claims
/// rows under a lease so replicas work on disjoint batches.
pub struct Relay {
    db: AsyncDatabase,
    transport: Arc<dyn StreamTransport>,
    metrics: Arc<PipelineMetrics>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        db: AsyncDatabase,
        transport: Arc<dyn StreamTransport>,
        metrics: Arc<PipelineMetrics>,
        config: RelayConfig,
    ) -> RelayResult<Self> {
        config.validate()?;
        Ok(Self {
            db,
            transport,
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run one cycle at the current time.
    pub async fn run_once(&self) -> RelayResult<BatchReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Run one cycle as if the clock read `now`.
    ///
    /// Claims a batch, publishes each row, then writes every row outcome in
    /// one transaction. Per-row failures never make this return an error;
    /// only database failures do.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RelayResult<BatchReport> {
        let relay_id = self.config.relay_id.clone();
        let batch_size = self.config.batch_size;
        let lease = self.config.claim_lease_chrono();

        let rows = self
            .db
            .call(move |conn| queries::claim_batch(conn, &relay_id, batch_size, now, lease))
            .await?;

        let mut report = BatchReport {
            claimed: rows.len(),
            ..BatchReport::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        let mut updates = Vec::with_capacity(rows.len());
        for row in &rows {
            let update = self.process_row(row, now).await;
            report.count(&update);
            updates.push(update);
        }

        let relay_id = self.config.relay_id.clone();
        report.updated = self
            .db
            .call(move |conn| queries::apply_outbox_updates(conn, &relay_id, &updates))
            .await?;

        info!(
            relay_id = %self.config.relay_id,
            claimed = report.claimed,
            published = report.published,
            retry_scheduled = report.retry_scheduled,
            dead_lettered = report.dead_lettered,
            "Outbox batch processed"
        );
        Ok(report)
    }

    async fn process_row(&self, row: &OutboxEvent, now: DateTime<Utc>) -> OutboxUpdate {
        // An earlier cycle exhausted the budget but could not write the DLQ entry.
        if row.attempts >= self.config.max_retry_attempts {
            let message = row
                .error_message
                .clone()
                .unwrap_or_else(|| BUDGET_EXHAUSTED.to_string());
            return self.dead_letter(row, row.attempts, message, now).await;
        }

        let envelope = EventEnvelope::new(
            row.event_id,
            row.event_type.clone(),
            row.aggregate_type.clone(),
            row.aggregate_id.clone(),
            row.tenant_id.clone(),
            row.payload.clone(),
            row.created_at,
        );

        match self.transport.append(&envelope).await {
            Ok(entry_id) => {
                self.metrics.record_publish_success(&envelope.topic, now);
                debug!(
                    event_id = %row.event_id,
                    entry_id = %entry_id,
                    topic = %envelope.topic,
                    "Event published"
                );
                OutboxUpdate::Published {
                    id: row.id,
                    published_at: now,
                }
            }
            Err(e) => {
                let attempts = row.attempts + 1;
                let message = e.to_string();
                self.metrics
                    .record_publish_failure(&row.event_id.to_string(), &message, now);

                if attempts >= self.config.max_retry_attempts {
                    return self.dead_letter(row, attempts, message, now).await;
                }

                let retry_at = next_attempt_at(now, self.config.retry_base_delay, attempts);
                warn!(
                    event_id = %row.event_id,
                    attempts,
                    next_attempt_at = %retry_at,
                    error = %message,
                    "Publish failed, retry scheduled"
                );
                OutboxUpdate::RetryScheduled {
                    id: row.id,
                    attempts,
                    next_attempt_at: retry_at,
                    error_message: message,
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        row: &OutboxEvent,
        attempts: u32,
        error_message: String,
        now: DateTime<Utc>,
    ) -> OutboxUpdate {
        let entry = DlqEntry {
            original_event_id: row.event_id,
            event_type: row.event_type.clone(),
            aggregate_id: row.aggregate_id.clone(),
            payload: row.payload.clone(),
            error_message: error_message.clone(),
            attempts,
            failed_at: now,
            created_at: row.created_at,
        };

        match self.transport.append_dlq(&entry).await {
            Ok(_) => {
                self.metrics.record_dead_letter(entry.topic());
                error!(
                    event_id = %row.event_id,
                    event_type = %row.event_type,
                    attempts,
                    error = %error_message,
                    "Event dead-lettered"
                );
                OutboxUpdate::DeadLettered {
                    id: row.id,
                    attempts,
                    error_message,
                    dead_lettered_at: now,
                }
            }
            Err(e) => {
                let retry_at = now
                    .checked_add_signed(self.config.poll_interval_chrono())
                    .unwrap_or(now);
                error!(
                    event_id = %row.event_id,
                    attempts,
                    error = %e,
                    "DLQ append failed, row left for a later cycle"
                );
                self.metrics.record_error(
                    "dlq",
                    Some(&row.event_id.to_string()),
                    &e.to_string(),
                    now,
                );
                OutboxUpdate::DeadLetterPending {
                    id: row.id,
                    attempts,
                    error_message,
                    retry_at,
                }
            }
        }
    }

    /// Refresh the backlog gauge from the outbox.
    pub async fn sample_backlog(&self) -> RelayResult<u64> {
        let backlog = self.db.call(|conn| queries::count_backlog(conn)).await?;
        self.metrics.set_backlog(backlog);
        Ok(backlog)
    }

    /// Run until `shutdown` fires.
    ///
    /// Non-empty batches are followed immediately by the next cycle; empty
    /// cycles and infrastructure errors sleep `poll_interval`. The signal is
    /// checked between cycles, so an in-flight batch always finishes.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> RelayResult<()> {
        info!(
            relay_id = %self.config.relay_id,
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            max_retry_attempts = self.config.max_retry_attempts,
            "Starting outbox relay"
        );

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let idle = match self.run_once().await {
                Ok(report) => report.is_empty(),
                Err(e) => {
                    error!(error = %e, "Relay cycle failed, retrying after poll interval");
                    self.metrics
                        .record_error("relay", None, &e.to_string(), Utc::now());
                    true
                }
            };

            if let Err(e) = self.sample_backlog().await {
                warn!(error = %e, "Failed to sample outbox backlog");
            }

            if idle {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(relay_id = %self.config.relay_id, "Outbox relay stopped");
        Ok(())
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}
