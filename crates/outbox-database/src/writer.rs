//! Outbox write API.
//!
//! [`OutboxWriter`] appends events inside a transaction owned by the caller.
//! It never commits: if the caller's business transaction rolls back, the
//! outbox row rolls back with it, so a business mutation and its event are
//! always committed together or not at all.

use crate::timestamp::format_timestamp;
use crate::{DatabaseResult, NewOutboxEvent, UserStatus, DEFAULT_TENANT_ID};
use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// Event type emitted when a user is created.
pub const USER_CREATED: &str = "user.created.v1";
/// Event type emitted when a user's profile changes.
pub const USER_UPDATED: &str = "user.updated.v1";
/// Event type emitted when a user is disabled.
pub const USER_DISABLED: &str = "user.disabled.v1";

/// User state carried by the user lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub status: UserStatus,
}

/// Appends events to the outbox inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct OutboxWriter {
    default_tenant_id: String,
}

impl Default for OutboxWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxWriter {
    /// Writer whose default tenant is [`DEFAULT_TENANT_ID`].
    pub fn new() -> Self {
        Self {
            default_tenant_id: DEFAULT_TENANT_ID.to_string(),
        }
    }

    /// Writer with a different default tenant.
    pub fn with_default_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            default_tenant_id: tenant_id.into(),
        }
    }

    /// Insert one unpublished event row and return its fresh event id.
    ///
    /// Does not commit. Errors propagate so the caller can roll back.
    pub fn add_event(&self, tx: &Transaction<'_>, event: NewOutboxEvent) -> DatabaseResult<Uuid> {
        self.add_event_at(tx, event, Utc::now())
    }

    /// [`add_event`](Self::add_event) with an explicit creation time.
    pub fn add_event_at(
        &self,
        tx: &Transaction<'_>,
        event: NewOutboxEvent,
        created_at: DateTime<Utc>,
    ) -> DatabaseResult<Uuid> {
        let event_id = Uuid::new_v4();
        let tenant_id = event
            .tenant_id
            .unwrap_or_else(|| self.default_tenant_id.clone());
        let payload = serde_json::to_string(&event.payload)?;

        tx.execute(
            "INSERT INTO outbox (event_id, event_type, aggregate_type, aggregate_id, payload, tenant_id, correlation_id, created_at, published, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0)",
            params![
                event_id.to_string(),
                event.event_type,
                event.aggregate_type,
                event.aggregate_id,
                payload,
                tenant_id,
                event.correlation_id,
                format_timestamp(created_at),
            ],
        )?;

        debug!(
            event_id = %event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Outbox event added"
        );

        Ok(event_id)
    }

    /// Record `user.created.v1`.
    pub fn user_created(&self, tx: &Transaction<'_>, user: &UserSnapshot) -> DatabaseResult<Uuid> {
        self.add_event(tx, user_event(USER_CREATED, user))
    }

    /// Record `user.updated.v1`.
    pub fn user_updated(&self, tx: &Transaction<'_>, user: &UserSnapshot) -> DatabaseResult<Uuid> {
        self.add_event(tx, user_event(USER_UPDATED, user))
    }

    /// Record `user.disabled.v1`.
    pub fn user_disabled(
        &self,
        tx: &Transaction<'_>,
        tenant_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> DatabaseResult<Uuid> {
        let payload = json!({
            "user_id": user_id,
            "tenant_id": tenant_id,
            "status": UserStatus::Disabled.as_str(),
            "reason": reason,
        });
        self.add_event(
            tx,
            NewOutboxEvent::new(USER_DISABLED, user_id, payload).tenant_id(tenant_id),
        )
    }
}

fn user_event(event_type: &str, user: &UserSnapshot) -> NewOutboxEvent {
    let payload = json!({
        "user_id": user.user_id,
        "tenant_id": user.tenant_id,
        "email": user.email,
        "display_name": user.display_name,
        "status": user.status.as_str(),
    });
    NewOutboxEvent::new(event_type, user.user_id.clone(), payload).tenant_id(user.tenant_id.clone())
}
