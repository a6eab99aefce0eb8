//! Idempotent dispatch of stream entries into a domain's read model.

use crate::{DispatchError, DispatchResult, HandlerRegistry};
use chrono::{DateTime, Utc};
use event_stream::{EventEnvelope, StreamEntry};
use outbox_database::rusqlite::TransactionBehavior;
use outbox_database::{queries, AsyncDatabase, DatabaseError, LedgerEntry};
use pipeline_metrics::PipelineMetrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    /// Handler ran and the ledger row was written.
    Applied,
    /// The event id was already in the ledger. Nothing ran.
    Duplicate,
    /// No handler for the event type. Recorded in the ledger only.
    Skipped,
}

/// Runs handlers for one domain with exactly-once effect.
///
/// Each event is applied in a single `IMMEDIATE` transaction covering the
/// ledger lookup, the handler's writes and the ledger insert.
pub struct Dispatcher {
    db: AsyncDatabase,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher, creating the domain's ledger table if needed.
    pub async fn new(
        db: AsyncDatabase,
        registry: HandlerRegistry,
        metrics: Arc<PipelineMetrics>,
    ) -> DispatchResult<Self> {
        let domain = registry.domain().clone();
        db.call(move |conn| queries::ensure_ledger_table(conn, &domain))
            .await?;

        Ok(Self {
            db,
            registry: Arc::new(registry),
            metrics,
        })
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Decode a stream entry and dispatch it.
    pub async fn dispatch_entry(&self, entry: &StreamEntry) -> DispatchResult<DispatchOutcome> {
        let envelope = match EventEnvelope::from_entry(entry) {
            Ok(envelope) => envelope,
            Err(e) => {
                let event_id = entry.get("event_id").unwrap_or(entry.id.as_str()).to_string();
                let err = DispatchError::MalformedPayload {
                    event_id,
                    message: e.to_string(),
                };
                self.record_failure(&err);
                return Err(err);
            }
        };
        self.dispatch(envelope).await
    }

    /// Dispatch an envelope, stamping the ledger row with the current time.
    pub async fn dispatch(&self, envelope: EventEnvelope) -> DispatchResult<DispatchOutcome> {
        self.dispatch_at(envelope, Utc::now()).await
    }

    pub async fn dispatch_at(
        &self,
        envelope: EventEnvelope,
        received_at: DateTime<Utc>,
    ) -> DispatchResult<DispatchOutcome> {
        let registry = self.registry.clone();
        let event_id = envelope.event_id.to_string();
        let event_type = envelope.event_type.clone();

        let result = self
            .db
            .call(move |conn| {
                let domain = registry.domain();
                let event_id = envelope.event_id.to_string();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                if queries::find_ledger_entry(&tx, domain, &event_id)?.is_some() {
                    tx.commit()?;
                    return Ok(Ok(DispatchOutcome::Duplicate));
                }

                let outcome = match registry.get(&envelope.event_type) {
                    Some(handler) => {
                        if let Err(e) = handler.handle(&tx, &envelope) {
                            // Dropping `tx` rolls back the handler's writes.
                            return Ok(Err(DispatchError::from_handler(
                                event_id,
                                &envelope.event_type,
                                e,
                            )));
                        }
                        DispatchOutcome::Applied
                    }
                    None => DispatchOutcome::Skipped,
                };

                let entry = LedgerEntry {
                    event_id,
                    event_type: envelope.event_type.clone(),
                    received_at,
                };
                match queries::insert_ledger_entry(&tx, domain, &entry) {
                    Ok(()) => {}
                    Err(DatabaseError::DuplicateLedgerEntry(_)) => {
                        return Ok(Ok(DispatchOutcome::Duplicate));
                    }
                    Err(e) => return Err(e),
                }

                tx.commit()?;
                Ok(Ok(outcome))
            })
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                self.record_failure(&err);
                return Err(err);
            }
            Err(e) => {
                let err = DispatchError::Database(e);
                self.record_failure(&err);
                return Err(err);
            }
        };

        match outcome {
            DispatchOutcome::Applied => self.metrics.record_applied(),
            DispatchOutcome::Duplicate => self.metrics.record_duplicate(),
            DispatchOutcome::Skipped => self.metrics.record_skipped(),
        }
        debug!(
            domain = %self.registry.domain(),
            event_id = %event_id,
            event_type = %event_type,
            outcome = ?outcome,
            "Event dispatched"
        );
        Ok(outcome)
    }

    fn record_failure(&self, err: &DispatchError) {
        warn!(
            domain = %self.registry.domain(),
            event_id = err.event_id().unwrap_or("-"),
            error = %err,
            "Event dispatch failed"
        );
        self.metrics.record_handler_failure(
            self.registry.domain().as_str(),
            err.event_id(),
            &err.to_string(),
        );
    }
}
