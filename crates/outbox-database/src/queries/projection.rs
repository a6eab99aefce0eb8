//! Identity read model (`users_projection`) queries.

use crate::timestamp::{format_timestamp, invalid_text, timestamp_column};
use crate::{DatabaseResult, UserProjection, UserStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Insert a user row unless one already exists for the key.
///
/// Returns `true` when a row was inserted.
pub fn insert_user_if_absent(conn: &Connection, user: &UserProjection) -> DatabaseResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO users_projection (tenant_id, user_id, email, display_name, status, last_event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (tenant_id, user_id) DO NOTHING",
        params![
            user.tenant_id,
            user.user_id,
            user.email,
            user.display_name,
            user.status.as_str(),
            user.last_event_id,
            format_timestamp(user.updated_at),
        ],
    )?;
    Ok(inserted == 1)
}

/// Insert or overwrite a user row. Last writer wins.
pub fn upsert_user(conn: &Connection, user: &UserProjection) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO users_projection (tenant_id, user_id, email, display_name, status, last_event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (tenant_id, user_id) DO UPDATE SET
            email = excluded.email,
            display_name = excluded.display_name,
            status = excluded.status,
            last_event_id = excluded.last_event_id,
            updated_at = excluded.updated_at",
        params![
            user.tenant_id,
            user.user_id,
            user.email,
            user.display_name,
            user.status.as_str(),
            user.last_event_id,
            format_timestamp(user.updated_at),
        ],
    )?;
    Ok(())
}

/// Change a user's status. Returns `false` when the user is unknown.
pub fn set_user_status(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    status: UserStatus,
    event_id: &str,
    updated_at: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let changed = conn.execute(
        "UPDATE users_projection
         SET status = ?1, last_event_id = ?2, updated_at = ?3
         WHERE tenant_id = ?4 AND user_id = ?5",
        params![
            status.as_str(),
            event_id,
            format_timestamp(updated_at),
            tenant_id,
            user_id
        ],
    )?;
    Ok(changed > 0)
}

/// Get a user row by key.
pub fn get_user(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
) -> DatabaseResult<Option<UserProjection>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tenant_id, user_id, email, display_name, status, last_event_id, updated_at
         FROM users_projection WHERE tenant_id = ?1 AND user_id = ?2",
    )?;

    let result = stmt.query_row(params![tenant_id, user_id], |row| {
        let raw_status: String = row.get(4)?;
        let status = UserStatus::parse(&raw_status)
            .ok_or_else(|| invalid_text(4, format!("unknown user status: {}", raw_status)))?;
        Ok(UserProjection {
            tenant_id: row.get(0)?,
            user_id: row.get(1)?,
            email: row.get(2)?,
            display_name: row.get(3)?,
            status,
            last_event_id: row.get(5)?,
            updated_at: timestamp_column(row, 6)?,
        })
    });

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Number of rows in the identity read model.
pub fn count_users(conn: &Connection) -> DatabaseResult<u64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM users_projection", [], |row| row.get(0))?;
    Ok(count as u64)
}
