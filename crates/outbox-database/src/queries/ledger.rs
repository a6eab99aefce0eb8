//! Per-domain consumer ledger queries.
//!
//! Each consumer domain owns a `{domain}_event_ledger` table whose primary
//! key on `event_id` is the only concurrency guard between replicas.

use crate::timestamp::{format_timestamp, timestamp_column};
use crate::{DatabaseError, DatabaseResult, LedgerDomain, LedgerEntry};
use rusqlite::{params, Connection};
use tracing::debug;

/// Create the domain's ledger table if it does not exist.
pub fn ensure_ledger_table(conn: &Connection, domain: &LedgerDomain) -> DatabaseResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            received_at TEXT NOT NULL
        );",
        table = domain.table_name()
    ))?;
    debug!(domain = %domain, "Ledger table ready");
    Ok(())
}

/// Look up an event id in the domain's ledger.
pub fn find_ledger_entry(
    conn: &Connection,
    domain: &LedgerDomain,
    event_id: &str,
) -> DatabaseResult<Option<LedgerEntry>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT event_id, event_type, received_at FROM {} WHERE event_id = ?1",
        domain.table_name()
    ))?;

    let result = stmt.query_row(params![event_id], |row| {
        Ok(LedgerEntry {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            received_at: timestamp_column(row, 2)?,
        })
    });

    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Record an event id in the domain's ledger.
///
/// Fails with [`DatabaseError::DuplicateLedgerEntry`] when the id is
/// already present.
pub fn insert_ledger_entry(
    conn: &Connection,
    domain: &LedgerDomain,
    entry: &LedgerEntry,
) -> DatabaseResult<()> {
    let result = conn.execute(
        &format!(
            "INSERT INTO {} (event_id, event_type, received_at) VALUES (?1, ?2, ?3)",
            domain.table_name()
        ),
        params![
            entry.event_id,
            entry.event_type,
            format_timestamp(entry.received_at)
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = DatabaseError::from(e);
            if err.is_unique_violation() {
                Err(DatabaseError::DuplicateLedgerEntry(entry.event_id.clone()))
            } else {
                Err(err)
            }
        }
    }
}

/// Number of events recorded in the domain's ledger.
pub fn count_ledger_entries(conn: &Connection, domain: &LedgerDomain) -> DatabaseResult<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", domain.table_name()),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn setup() -> (Connection, LedgerDomain) {
        let conn = Connection::open_in_memory().unwrap();
        let domain = LedgerDomain::new("identity").unwrap();
        ensure_ledger_table(&conn, &domain).unwrap();
        (conn, domain)
    }

    fn entry(event_id: &str) -> LedgerEntry {
        LedgerEntry {
            event_id: event_id.to_string(),
            event_type: "user.created.v1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_find_missing_entry_returns_none() {
        let (conn, domain) = setup();
        assert!(find_ledger_entry(&conn, &domain, "e-1").unwrap().is_none());
    }

    #[test]
    fn test_insert_then_find() {
        let (conn, domain) = setup();
        insert_ledger_entry(&conn, &domain, &entry("e-1")).unwrap();

        let found = find_ledger_entry(&conn, &domain, "e-1").unwrap().unwrap();
        assert_eq!(found.event_id, "e-1");
        assert_eq!(found.event_type, "user.created.v1");
        assert_eq!(count_ledger_entries(&conn, &domain).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_reported() {
        let (conn, domain) = setup();
        insert_ledger_entry(&conn, &domain, &entry("e-1")).unwrap();

        let err = insert_ledger_entry(&conn, &domain, &entry("e-1")).unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateLedgerEntry(ref id) if id == "e-1"));
        assert!(err.is_unique_violation());
        assert_eq!(count_ledger_entries(&conn, &domain).unwrap(), 1);
    }

    #[test]
    fn test_domains_are_isolated() {
        let (conn, identity) = setup();
        let linting = LedgerDomain::new("linting").unwrap();
        ensure_ledger_table(&conn, &linting).unwrap();
        ensure_ledger_table(&conn, &linting).unwrap();

        insert_ledger_entry(&conn, &identity, &entry("e-1")).unwrap();
        insert_ledger_entry(&conn, &linting, &entry("e-1")).unwrap();

        assert_eq!(count_ledger_entries(&conn, &identity).unwrap(), 1);
        assert_eq!(count_ledger_entries(&conn, &linting).unwrap(), 1);
    }

    #[test]
    fn test_rolled_back_insert_leaves_no_entry() {
        let (mut conn, domain) = setup();
        {
            let tx = conn.transaction().unwrap();
            insert_ledger_entry(&tx, &domain, &entry("e-1")).unwrap();
            tx.rollback().unwrap();
        }
        assert!(find_ledger_entry(&conn, &domain, "e-1").unwrap().is_none());
    }
}
