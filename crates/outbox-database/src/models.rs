//! Database model types.

use crate::{DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant used when the caller does not name one.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Aggregate type used when the caller does not name one.
pub const DEFAULT_AGGREGATE_TYPE: &str = "user";

/// Event to append to the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub aggregate_type: String,
    /// `None` means the writer's default tenant.
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl NewOutboxEvent {
    /// Event of `event_type` about `aggregate_id`, with default aggregate type
    /// and tenant and no correlation id.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            aggregate_type: DEFAULT_AGGREGATE_TYPE.to_string(),
            tenant_id: None,
            correlation_id: None,
        }
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = aggregate_type.into();
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A row of the outbox table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub tenant_id: String,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub dead_lettered: bool,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

/// Status change the relay applies to a claimed row.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxUpdate {
    /// Stream append succeeded. Terminal.
    Published {
        id: i64,
        published_at: DateTime<Utc>,
    },
    /// Stream append failed with retry budget left.
    RetryScheduled {
        id: i64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error_message: String,
    },
    /// Retry budget exhausted and the DLQ entry was appended. Terminal.
    DeadLettered {
        id: i64,
        attempts: u32,
        error_message: String,
        dead_lettered_at: DateTime<Utc>,
    },
    /// Retry budget exhausted but the DLQ append failed; the row becomes
    /// claimable again at `retry_at` so a later cycle retries the DLQ step.
    DeadLetterPending {
        id: i64,
        attempts: u32,
        error_message: String,
        retry_at: DateTime<Utc>,
    },
}

impl OutboxUpdate {
    /// Outbox row id this update applies to.
    pub fn id(&self) -> i64 {
        match self {
            Self::Published { id, .. }
            | Self::RetryScheduled { id, .. }
            | Self::DeadLettered { id, .. }
            | Self::DeadLetterPending { id, .. } => *id,
        }
    }
}

/// Outbox row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    /// Rows not yet published (includes rows waiting on backoff).
    pub pending: u64,
    /// Pending rows that have failed at least once.
    pub retrying: u64,
    /// Rows delivered to the stream.
    pub published: u64,
    /// Rows that exhausted their retry budget.
    pub dead_lettered: u64,
}

/// Consumer domain owning a ledger table (`{domain}_event_ledger`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerDomain(String);

impl LedgerDomain {
    const MAX_LEN: usize = 48;

    /// Validate a domain name. Only `[a-z0-9_]` is accepted since the name is
    /// spliced into a table identifier.
    pub fn new(name: impl Into<String>) -> DatabaseResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= Self::MAX_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if valid {
            Ok(Self(name))
        } else {
            Err(DatabaseError::InvalidDomain(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of this domain's ledger table.
    pub fn table_name(&self) -> String {
        format!("{}_event_ledger", self.0)
    }
}

impl std::fmt::Display for LedgerDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row of a domain ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
}

/// User account status in the identity read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl Default for UserStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// A row of the identity read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProjection {
    pub tenant_id: String,
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub status: UserStatus,
    pub last_event_id: String,
    pub updated_at: DateTime<Utc>,
}
