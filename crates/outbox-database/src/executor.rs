//! Async SQLite executor using a dedicated background thread.
//!
//! All SQL runs on one thread owned by `tokio_rusqlite`; callers send closures
//! through a channel and await the result without blocking the runtime.
//!
//! Closures receive `&mut rusqlite::Connection` so they can open their own
//! transactions. Only SQL and light row mapping belong inside `call()`:
//! stream I/O and handler logic that does not touch the database must run
//! outside, or every other query waits behind it.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let backlog = db.call(|conn| queries::count_backlog(conn)).await?;
//! ```

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const MEMORY_PATH: &str = ":memory:";

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; clones share the same connection and thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database file, creating it and its parent directory if needed.
    ///
    /// Enables WAL mode with a 5s busy timeout and runs pending migrations.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };
        db.initialize(true).await?;

        info!(path = %db.path, "Async database initialized with WAL mode");
        Ok(db)
    }

    /// Open a private in-memory database. Used by tests and demos.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: MEMORY_PATH.to_string(),
        };
        db.initialize(false).await?;
        debug!("In-memory database initialized");
        Ok(db)
    }

    async fn initialize(&self, wal: bool) -> DatabaseResult<()> {
        self.call(move |conn| {
            if wal {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    ",
                )?;
            }
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            migrations::run_migrations(conn)
        })
        .await
    }

    /// Run a closure on the database thread.
    ///
    /// The closure's own `DatabaseResult` is passed through unchanged;
    /// executor failures map to [`DatabaseError::Connection`].
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Run a closure that only produces rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Database file path, or `:memory:`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute a trivial query to confirm the executor thread is alive.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Wait for queued operations, then stop the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, NewOutboxEvent, OutboxWriter};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_async_database_open_runs_migrations() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("outbox.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());
        assert!(db_path.exists());

        let version: i32 = db
            .call_sqlite(|conn| conn.query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_transaction_inside_call() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let writer = OutboxWriter::new();

        let event_id = db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id = writer.add_event(
                    &tx,
                    NewOutboxEvent::new("user.created.v1", "u-1", json!({"user_id": "u-1"})),
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await
            .unwrap();

        let row = db
            .call(move |conn| queries::get_outbox_event(conn, &event_id))
            .await
            .unwrap();
        assert!(row.is_some());
    }

    #[tokio::test]
    async fn test_closure_error_is_passed_through() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        let result: DatabaseResult<()> = db
            .call(|_| Err(DatabaseError::InvalidData("nope".to_string())))
            .await;
        assert!(matches!(result, Err(DatabaseError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let dir = tempdir().unwrap();
        let db = AsyncDatabase::open(&dir.path().join("concurrent.db")).await.unwrap();
        let writer = OutboxWriter::new();

        let mut handles = vec![];
        for i in 0..10 {
            let db = db.clone();
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                db.call(move |conn| {
                    let tx = conn.transaction()?;
                    writer.add_event(
                        &tx,
                        NewOutboxEvent::new("user.created.v1", format!("u-{}", i), json!({})),
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count = db.call(|conn| queries::count_outbox_events(conn)).await.unwrap();
        assert_eq!(count, 10);
    }
}
