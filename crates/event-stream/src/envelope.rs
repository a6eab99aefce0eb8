//! Event envelopes and dead-letter records.

use crate::entry::{wire_timestamp, EntryFields, StreamEntry};
use crate::{StreamError, StreamResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope schema version written by this relay.
pub const SCHEMA_VERSION: u32 = 1;

/// Topic of an event type: its aggregate prefix.
///
/// `user.created.v1` maps to `user`. A type with no dot is its own topic.
pub fn topic_for(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

/// Wire representation of an outbox event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub topic: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build an envelope at the current schema version, deriving the topic
    /// from the event type.
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            event_id,
            topic: topic_for(&event_type).to_string(),
            event_type,
            schema_version: SCHEMA_VERSION,
            occurred_at,
            tenant_id: tenant_id.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            payload,
        }
    }

    /// Flatten into stream fields. The payload travels as a JSON string.
    pub fn to_fields(&self) -> StreamResult<EntryFields> {
        Ok(vec![
            ("event_id".to_string(), self.event_id.to_string()),
            ("event_type".to_string(), self.event_type.clone()),
            ("topic".to_string(), self.topic.clone()),
            ("schema_version".to_string(), self.schema_version.to_string()),
            ("occurred_at".to_string(), wire_timestamp(self.occurred_at)),
            ("tenant_id".to_string(), self.tenant_id.clone()),
            ("aggregate_id".to_string(), self.aggregate_id.clone()),
            ("aggregate_type".to_string(), self.aggregate_type.clone()),
            ("payload".to_string(), serde_json::to_string(&self.payload)?),
        ])
    }

    /// Decode a stream entry.
    pub fn from_entry(entry: &StreamEntry) -> StreamResult<Self> {
        let event_id = Uuid::parse_str(entry.required("event_id")?)
            .map_err(|e| StreamError::invalid("event_id", e))?;
        let event_type = entry.required("event_type")?.to_string();
        let topic = entry
            .get("topic")
            .map(str::to_string)
            .unwrap_or_else(|| topic_for(&event_type).to_string());
        let schema_version = entry
            .required("schema_version")?
            .parse::<u32>()
            .map_err(|e| StreamError::invalid("schema_version", e))?;
        let payload = serde_json::from_str(entry.required("payload")?)
            .map_err(|e| StreamError::invalid("payload", e))?;

        Ok(Self {
            event_id,
            event_type,
            topic,
            schema_version,
            occurred_at: entry.required_timestamp("occurred_at")?,
            tenant_id: entry.required("tenant_id")?.to_string(),
            aggregate_id: entry.required("aggregate_id")?.to_string(),
            aggregate_type: entry.required("aggregate_type")?.to_string(),
            payload,
        })
    }
}

/// Record appended to the dead-letter stream when an event exhausts its
/// retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub original_event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// When the original outbox row was created.
    pub created_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Topic of the original event.
    pub fn topic(&self) -> &str {
        topic_for(&self.event_type)
    }

    pub fn to_fields(&self) -> StreamResult<EntryFields> {
        Ok(vec![
            ("original_event_id".to_string(), self.original_event_id.to_string()),
            ("event_type".to_string(), self.event_type.clone()),
            ("aggregate_id".to_string(), self.aggregate_id.clone()),
            ("payload".to_string(), serde_json::to_string(&self.payload)?),
            ("error_message".to_string(), self.error_message.clone()),
            ("attempts".to_string(), self.attempts.to_string()),
            ("failed_at".to_string(), wire_timestamp(self.failed_at)),
            ("created_at".to_string(), wire_timestamp(self.created_at)),
        ])
    }

    pub fn from_entry(entry: &StreamEntry) -> StreamResult<Self> {
        Ok(Self {
            original_event_id: Uuid::parse_str(entry.required("original_event_id")?)
                .map_err(|e| StreamError::invalid("original_event_id", e))?,
            event_type: entry.required("event_type")?.to_string(),
            aggregate_id: entry.required("aggregate_id")?.to_string(),
            payload: serde_json::from_str(entry.required("payload")?)
                .map_err(|e| StreamError::invalid("payload", e))?,
            error_message: entry.required("error_message")?.to_string(),
            attempts: entry
                .required("attempts")?
                .parse()
                .map_err(|e| StreamError::invalid("attempts", e))?,
            failed_at: entry.required_timestamp("failed_at")?,
            created_at: entry.required_timestamp("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> EventEnvelope {
        EventEnvelope::new(
            Uuid::new_v4(),
            "user.created.v1",
            "user",
            "u-1",
            "acme",
            json!({"user_id": "u-1", "email": "a@example.com"}),
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_topic_is_aggregate_prefix() {
        assert_eq!(topic_for("user.created.v1"), "user");
        assert_eq!(topic_for("invoice.paid.v2"), "invoice");
        assert_eq!(topic_for("heartbeat"), "heartbeat");
    }

    #[test]
    fn test_envelope_fields_are_flat_strings() {
        let envelope = sample();
        let fields = envelope.to_fields().unwrap();
        let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "event_id",
                "event_type",
                "topic",
                "schema_version",
                "occurred_at",
                "tenant_id",
                "aggregate_id",
                "aggregate_type",
                "payload"
            ]
        );

        let entry = StreamEntry::new("1-0", fields);
        assert_eq!(entry.get("topic"), Some("user"));
        assert_eq!(entry.get("schema_version"), Some("1"));
        assert_eq!(entry.get("occurred_at"), Some("2024-05-01T09:00:00.000000Z"));
        assert_eq!(EventEnvelope::from_entry(&entry).unwrap(), envelope);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let mut fields = sample().to_fields().unwrap();
        for (name, value) in fields.iter_mut() {
            if name == "payload" {
                *value = "{not json".to_string();
            }
        }
        let err = EventEnvelope::from_entry(&StreamEntry::new("1-0", fields)).unwrap_err();
        assert!(matches!(err, StreamError::InvalidField { field: "payload", .. }));
    }

    #[test]
    fn test_missing_event_id_is_rejected() {
        let fields = sample()
            .to_fields()
            .unwrap()
            .into_iter()
            .filter(|(name, _)| name != "event_id")
            .collect();
        let err = EventEnvelope::from_entry(&StreamEntry::new("1-0", fields)).unwrap_err();
        assert!(matches!(err, StreamError::MissingField("event_id")));
    }

    #[test]
    fn test_dlq_entry_fields() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let entry = DlqEntry {
            original_event_id: Uuid::new_v4(),
            event_type: "user.disabled.v1".to_string(),
            aggregate_id: "u-1".to_string(),
            payload: json!({"user_id": "u-1"}),
            error_message: "connection refused".to_string(),
            attempts: 2,
            failed_at: at,
            created_at: at,
        };
        assert_eq!(entry.topic(), "user");

        let decoded = DlqEntry::from_entry(&StreamEntry::new("7-0", entry.to_fields().unwrap())).unwrap();
        assert_eq!(decoded, entry);
    }
}
