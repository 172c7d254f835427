//! Date parsing and formatting for feed timestamps.
//!
//! Feeds in the wild carry publication dates in a handful of RFC 822
//! descendants. We accept RFC 822, RFC 822Z, RFC 1123, and RFC 1123Z on
//! input and always emit RFC 822.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{RecastError, Result};

/// Input formats tried after the RFC 2822 parser, with named UTC zones
/// already normalized to a numeric offset.
const NUMERIC_FORMATS: &[&str] = &[
    "%d %b %y %H:%M %z",
    "%d %b %y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %y %H:%M %z",
    "%a, %d %b %Y %H:%M:%S %z",
];

/// Parse a feed publication date.
///
/// Accepts RFC 822 ("02 Jan 06 15:04 MST"), RFC 822Z, RFC 1123
/// ("Mon, 02 Jan 2006 15:04:05 MST"), and RFC 1123Z.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let normalized = normalize_utc_zone(s);
    for fmt in NUMERIC_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Err(RecastError::Format(format!("invalid date format: {s}")))
}

/// Rewrite a trailing named UTC zone as a numeric offset so the `%z`
/// formats can take it.
fn normalize_utc_zone(s: &str) -> String {
    for zone in [" UTC", " GMT", " UT"] {
        if let Some(stripped) = s.strip_suffix(zone) {
            return format!("{stripped} +0000");
        }
    }
    s.to_string()
}

/// Format a date the one way we emit them: RFC 822, UTC.
pub fn format_rfc822(t: DateTime<Utc>) -> String {
    t.format("%d %b %y %H:%M UTC").to_string()
}

/// Parse a memento `datetime` parameter.
///
/// RFC 1123 per RFC 7089, plus the loose "Mon, 2 Jan 2006, 15:04:05 GMT"
/// variant some archives emit.
pub fn parse_memento_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%a, %d %b %Y, %H:%M:%S GMT") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(RecastError::Format(format!("invalid memento datetime: {s}")))
}

/// Canonical RFC 1123 rendering for memento datetimes.
pub fn format_rfc1123(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Midnight UTC of a calendar day, the instant replayed items are stamped
/// with.
pub fn utc_midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}
