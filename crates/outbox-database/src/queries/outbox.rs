//! Relay-side outbox queries.
//!
//! Claiming and finalising are separate short `IMMEDIATE` transactions so
//! no write lock is held while the relay talks to the stream.

use crate::timestamp::{format_timestamp, invalid_text, optional_timestamp_column, timestamp_column};
use crate::{DatabaseResult, OutboxEvent, OutboxStats, OutboxUpdate};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

const OUTBOX_COLUMNS: &str = "id, event_id, event_type, aggregate_type, aggregate_id, payload, tenant_id, correlation_id, created_at, published, published_at, attempts, next_attempt_at, error_message, dead_lettered, claimed_by, claim_expires_at";

fn map_outbox_row(row: &Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let raw_event_id: String = row.get(1)?;
    let event_id = Uuid::parse_str(&raw_event_id)
        .map_err(|e| invalid_text(1, format!("bad event_id {}: {}", raw_event_id, e)))?;
    let raw_payload: String = row.get(5)?;
    let payload = serde_json::from_str(&raw_payload)
        .map_err(|e| invalid_text(5, format!("bad payload: {}", e)))?;

    Ok(OutboxEvent {
        id: row.get(0)?,
        event_id,
        event_type: row.get(2)?,
        aggregate_type: row.get(3)?,
        aggregate_id: row.get(4)?,
        payload,
        tenant_id: row.get(6)?,
        correlation_id: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
        published: row.get(9)?,
        published_at: optional_timestamp_column(row, 10)?,
        attempts: row.get(11)?,
        next_attempt_at: optional_timestamp_column(row, 12)?,
        error_message: row.get(13)?,
        dead_lettered: row.get(14)?,
        claimed_by: row.get(15)?,
        claim_expires_at: optional_timestamp_column(row, 16)?,
    })
}

/// Claim up to `limit` eligible rows for `relay_id`.
///
/// A row is eligible when it is unpublished, its backoff has elapsed, and it
/// is not under another relay's live lease. Rows are returned oldest first
/// (ties broken by id) and stay leased until `now + lease`.
pub fn claim_batch(
    conn: &mut Connection,
    relay_id: &str,
    limit: usize,
    now: DateTime<Utc>,
    lease: Duration,
) -> DatabaseResult<Vec<OutboxEvent>> {
    let now_str = format_timestamp(now);
    let expires_at = now + lease;
    let expires_str = format_timestamp(expires_at);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut events = {
        let mut stmt = tx.prepare_cached(&format!(
            "SELECT {} FROM outbox
             WHERE published = 0
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
               AND (claim_expires_at IS NULL OR claim_expires_at <= ?1)
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
            OUTBOX_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![now_str, limit as i64], map_outbox_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    {
        let mut stmt = tx.prepare_cached(
            "UPDATE outbox SET claimed_by = ?1, claim_expires_at = ?2 WHERE id = ?3",
        )?;
        for event in &mut events {
            stmt.execute(params![relay_id, expires_str, event.id])?;
            event.claimed_by = Some(relay_id.to_string());
            event.claim_expires_at = Some(expires_at);
        }
    }

    tx.commit()?;

    if !events.is_empty() {
        debug!(relay_id, count = events.len(), "Claimed outbox batch");
    }
    Ok(events)
}

/// Apply a batch of row outcomes in one transaction and release the claims.
///
/// Each update only touches a row still claimed by `relay_id` and not yet
/// published, so a relay whose lease was taken over cannot overwrite the new
/// owner's result. Returns the number of rows updated.
pub fn apply_outbox_updates(
    conn: &mut Connection,
    relay_id: &str,
    updates: &[OutboxUpdate],
) -> DatabaseResult<usize> {
    if updates.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut applied = 0;

    for update in updates {
        let changed = match update {
            OutboxUpdate::Published { id, published_at } => tx.execute(
                "UPDATE outbox
                 SET published = 1, published_at = ?1, next_attempt_at = NULL,
                     claimed_by = NULL, claim_expires_at = NULL
                 WHERE id = ?2 AND claimed_by = ?3 AND published = 0",
                params![format_timestamp(*published_at), id, relay_id],
            )?,
            OutboxUpdate::RetryScheduled {
                id,
                attempts,
                next_attempt_at,
                error_message,
            } => tx.execute(
                "UPDATE outbox
                 SET attempts = ?1, next_attempt_at = ?2, error_message = ?3,
                     claimed_by = NULL, claim_expires_at = NULL
                 WHERE id = ?4 AND claimed_by = ?5 AND published = 0",
                params![
                    attempts,
                    format_timestamp(*next_attempt_at),
                    error_message,
                    id,
                    relay_id
                ],
            )?,
            OutboxUpdate::DeadLettered {
                id,
                attempts,
                error_message,
                dead_lettered_at,
            } => tx.execute(
                "UPDATE outbox
                 SET published = 1, published_at = ?1, dead_lettered = 1,
                     attempts = ?2, error_message = ?3, next_attempt_at = NULL,
                     claimed_by = NULL, claim_expires_at = NULL
                 WHERE id = ?4 AND claimed_by = ?5 AND published = 0",
                params![
                    format_timestamp(*dead_lettered_at),
                    attempts,
                    error_message,
                    id,
                    relay_id
                ],
            )?,
            OutboxUpdate::DeadLetterPending {
                id,
                attempts,
                error_message,
                retry_at,
            } => tx.execute(
                "UPDATE outbox
                 SET attempts = ?1, error_message = ?2, next_attempt_at = ?3,
                     claimed_by = NULL, claim_expires_at = NULL
                 WHERE id = ?4 AND claimed_by = ?5 AND published = 0",
                params![
                    attempts,
                    error_message,
                    format_timestamp(*retry_at),
                    id,
                    relay_id
                ],
            )?,
        };

        if changed == 0 {
            warn!(
                relay_id,
                outbox_id = update.id(),
                "Outbox row no longer claimed by this relay, update skipped"
            );
        }
        applied += changed;
    }

    tx.commit()?;
    Ok(applied)
}

/// Number of unpublished rows, including rows waiting on backoff.
pub fn count_backlog(conn: &Connection) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE published = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Total number of outbox rows.
pub fn count_outbox_events(conn: &Connection) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Row counts by delivery state.
pub fn outbox_stats(conn: &Connection) -> DatabaseResult<OutboxStats> {
    let stats = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN published = 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN published = 0 AND attempts > 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN published = 1 AND dead_lettered = 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN dead_lettered = 1 THEN 1 ELSE 0 END), 0)
         FROM outbox",
        [],
        |row| {
            Ok(OutboxStats {
                pending: row.get::<_, i64>(0)? as u64,
                retrying: row.get::<_, i64>(1)? as u64,
                published: row.get::<_, i64>(2)? as u64,
                dead_lettered: row.get::<_, i64>(3)? as u64,
            })
        },
    )?;
    Ok(stats)
}

/// Get an outbox row by its event id.
pub fn get_outbox_event(conn: &Connection, event_id: &Uuid) -> DatabaseResult<Option<OutboxEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM outbox WHERE event_id = ?1",
        OUTBOX_COLUMNS
    ))?;

    match stmt.query_row(params![event_id.to_string()], map_outbox_row) {
        Ok(event) => Ok(Some(event)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List outbox rows in insertion order.
pub fn list_outbox_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<OutboxEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM outbox ORDER BY id ASC LIMIT ?1",
        OUTBOX_COLUMNS
    ))?;
    let events = stmt
        .query_map(params![limit as i64], map_outbox_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}
