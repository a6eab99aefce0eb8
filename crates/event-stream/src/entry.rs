//! Flat string-map stream entries.

use crate::{StreamError, StreamResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// Field/value pairs in append order.
pub type EntryFields = Vec<(String, String)>;

/// An entry as read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Server-assigned entry id (e.g. `1718000000000-0`).
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: EntryFields) -> Self {
        Self {
            id: id.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub(crate) fn required(&self, field: &'static str) -> StreamResult<&str> {
        self.get(field).ok_or(StreamError::MissingField(field))
    }

    pub(crate) fn required_timestamp(&self, field: &'static str) -> StreamResult<DateTime<Utc>> {
        let raw = self.required(field)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StreamError::invalid(field, e))
    }
}

/// ISO-8601 rendering used for every timestamp on the wire.
pub fn wire_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
