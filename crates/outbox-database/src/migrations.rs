//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.
//! Per-domain ledger tables are not migrations: consumers create them on
//! startup with [`crate::queries::ensure_ledger_table`].

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_users_projection(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: outbox table.
///
/// `claimed_by` / `claim_expires_at` hold a relay's lease on a row between
/// the claim transaction and the status-update transaction.
fn migrate_v1_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            correlation_id TEXT,
            created_at TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            published_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT,
            error_message TEXT,
            dead_lettered INTEGER NOT NULL DEFAULT 0,
            claimed_by TEXT,
            claim_expires_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_unpublished
            ON outbox(published, created_at, id);
        CREATE INDEX IF NOT EXISTS idx_outbox_aggregate
            ON outbox(aggregate_type, aggregate_id);
        ",
    )?;

    record_migration(conn, 1, "outbox")?;
    Ok(())
}

/// V2: identity read model maintained by the identity consumer.
fn migrate_v2_users_projection(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: users projection");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users_projection (
            tenant_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            email TEXT NOT NULL,
            display_name TEXT,
            status TEXT NOT NULL,
            last_event_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, user_id)
        );
        ",
    )?;

    record_migration(conn, 2, "users_projection")?;
    Ok(())
}
