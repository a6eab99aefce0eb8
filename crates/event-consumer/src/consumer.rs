//! Stream read loop.

use crate::{DispatchOutcome, DispatchResult, Dispatcher};
use event_stream::{StreamEntry, StreamReader};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Consumer read settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Entries requested per read.
    pub batch_size: usize,
    /// How long a read waits for new entries.
    pub block: Duration,
    /// Pause after a failed read.
    pub error_backoff: Duration,
    /// How long an entry may sit unacknowledged before it is reclaimed and
    /// dispatched again.
    pub reclaim_idle: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            reclaim_idle: Duration::from_secs(30),
        }
    }
}

/// What one read did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub received: usize,
    /// Of `received`, entries reclaimed after sitting unacknowledged.
    pub reclaimed: usize,
    pub applied: usize,
    pub duplicate: usize,
    pub skipped: usize,
    /// Entries left unacknowledged for redelivery.
    pub failed: usize,
}

/// Reads entries, dispatches them one at a time and acknowledges the ones
/// that were applied, skipped or found to be duplicates.
pub struct ConsumerLoop {
    reader: Arc<dyn StreamReader>,
    dispatcher: Dispatcher,
    config: ConsumerConfig,
}

impl ConsumerLoop {
    pub fn new(reader: Arc<dyn StreamReader>, dispatcher: Dispatcher, config: ConsumerConfig) -> Self {
        Self {
            reader,
            dispatcher,
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Reclaim idle pending entries, or read new ones when there are none,
    /// and process the batch.
    ///
    /// Only stream failures are returned; dispatch failures are counted in
    /// the report and their entries stay pending until reclaimed.
    pub async fn poll_once(&self) -> DispatchResult<PollReport> {
        let reclaimed = self.reclaim().await?;
        if !reclaimed.is_empty() {
            return self.process(&reclaimed, true).await;
        }

        let entries = self
            .reader
            .read(self.config.batch_size, self.config.block)
            .await?;
        self.process(&entries, false).await
    }

    async fn reclaim(&self) -> DispatchResult<Vec<StreamEntry>> {
        let entries = self
            .reader
            .reclaim(self.config.reclaim_idle, self.config.batch_size)
            .await?;
        if !entries.is_empty() {
            warn!(
                domain = %self.dispatcher.registry().domain(),
                count = entries.len(),
                "Retrying entries left unacknowledged"
            );
        }
        Ok(entries)
    }

    async fn process(&self, entries: &[StreamEntry], reclaimed: bool) -> DispatchResult<PollReport> {
        let mut report = PollReport {
            received: entries.len(),
            reclaimed: if reclaimed { entries.len() } else { 0 },
            ..PollReport::default()
        };

        for entry in entries {
            match self.dispatcher.dispatch_entry(entry).await {
                Ok(outcome) => {
                    match outcome {
                        DispatchOutcome::Applied => report.applied += 1,
                        DispatchOutcome::Duplicate => report.duplicate += 1,
                        DispatchOutcome::Skipped => report.skipped += 1,
                    }
                    self.reader.ack(&entry.id).await?;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        entry_id = %entry.id,
                        error = %e,
                        "Dispatch failed, leaving entry pending"
                    );
                }
            }
        }

        if report.received > 0 {
            debug!(
                domain = %self.dispatcher.registry().domain(),
                received = report.received,
                reclaimed = report.reclaimed,
                applied = report.applied,
                duplicate = report.duplicate,
                skipped = report.skipped,
                failed = report.failed,
                "Stream batch consumed"
            );
        }
        Ok(report)
    }

    /// Run until `shutdown` fires. The signal is checked between batches.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> DispatchResult<()> {
        let domain = self.dispatcher.registry().domain().clone();
        info!(
            domain = %domain,
            event_types = ?self.dispatcher.registry().event_types(),
            "Starting consumer"
        );

        loop {
            if !matches!(
                shutdown.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                break;
            }

            let result = match self.reclaim().await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    self.process(&reclaimed, true).await.map(|_| ())
                }
                Ok(_) => {
                    // Only the wait for entries is cancellable; a read batch is
                    // always processed to the end.
                    let read = tokio::select! {
                        _ = shutdown.recv() => break,
                        result = self.reader.read(self.config.batch_size, self.config.block) => result,
                    };
                    match read {
                        Ok(entries) => self.process(&entries, false).await.map(|_| ()),
                        Err(e) => Err(e.into()),
                    }
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                warn!(domain = %domain, error = %e, "Stream read failed, backing off");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }

        info!(domain = %domain, "Consumer stopped");
        Ok(())
    }
}
