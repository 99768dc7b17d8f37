//! Watermark timestamp helpers
//!
//! Watermarks are stored as text in the checkpoint document. Configured start
//! dates use the bare `YYYY-MM-DDTHH:MM:SS` layout (interpreted as UTC) while
//! everything written back uses RFC 3339.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{CommonError, Result};

/// Layout accepted for configured start dates.
pub const START_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a watermark timestamp.
///
/// Accepts the configuration layout first, then falls back to RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, START_DATE_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| CommonError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Format a watermark for persistence.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Convert an epoch-milliseconds clock value into a timestamp.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Drop any sub-second part of a timestamp.
pub fn floor_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}
