use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("`{0}` has no timezone offset; send an RFC 3339 instant such as 2025-04-22T10:00:00Z")]
    MissingOffset(String),

    #[error("`{0}` is not a valid RFC 3339 instant")]
    Malformed(String),
}

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a client-supplied instant and normalizes it to UTC.
///
/// Local times without an offset are rejected, never assumed to be in some
/// zone.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>, TimeError> {
    let input = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // ISO 8601 basic offsets, e.g. +0800
    if let Ok(parsed) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(parsed.with_timezone(&Utc));
    }

    let is_local = LOCAL_FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(input, format).is_ok());
    if is_local {
        return Err(TimeError::MissingOffset(input.to_string()));
    }

    Err(TimeError::Malformed(input.to_string()))
}

/// Fixed-width UTC rendering. Lexicographic order equals chronological order
/// for years 0..=9999, which the store relies on for range scans.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
