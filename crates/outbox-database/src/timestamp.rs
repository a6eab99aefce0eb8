//! Timestamp encoding.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision and a `Z` suffix, so SQL string comparison orders them the same
//! way as the instants they represent. Instants outside years 0000..=9999
//! are clamped, since a five-digit or signed year would break that ordering.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Latest storable instant, `9999-12-31T23:59:59.999999Z`.
pub fn max_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn min_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(0, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Encode a timestamp for storage.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.clamp(min_timestamp(), max_timestamp())
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read a non-null timestamp column.
pub(crate) fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| invalid_text(idx, format!("bad timestamp: {}", raw)))
}

/// Read a nullable timestamp column.
pub(crate) fn optional_timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| invalid_text(idx, format!("bad timestamp: {}", raw))),
        None => Ok(None),
    }
}

pub(crate) fn invalid_text(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let fractional = whole + Duration::nanoseconds(123_456_789);

        let a = format_timestamp(whole);
        let b = format_timestamp(fractional);
        assert_eq!(a, "2024-01-15T10:30:00.000000Z");
        assert_eq!(b, "2024-01-15T10:30:00.123456Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let base = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let later = base + Duration::seconds(1);
        assert!(format_timestamp(base) < format_timestamp(later));
    }

    #[test]
    fn test_far_future_is_clamped_to_four_digit_year() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stored = format_timestamp(DateTime::<Utc>::MAX_UTC);
        assert_eq!(stored, "9999-12-31T23:59:59.999999Z");
        assert_eq!(stored.len(), format_timestamp(now).len());
        assert!(format_timestamp(now) < stored);
        assert_eq!(parse_timestamp(&stored), Some(max_timestamp()));

        assert_eq!(
            format_timestamp(DateTime::<Utc>::MIN_UTC),
            "0000-01-01T00:00:00.000000Z"
        );
    }

    #[test]
    fn test_parse_roundtrip_and_garbage() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(now)), Some(now));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
