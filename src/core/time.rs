//! Shared timestamp/event-id helpers for durable state records.

use chrono::{DateTime, TimeZone, Utc};
use ulid::Ulid;

/// Current wall-clock time as an RFC 3339 string (UTC).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parse a stored timestamp. Accepts RFC 3339 and the legacy
/// unix-epoch-with-`Z` short form (e.g. `1771220592Z`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = raw.trim_end_matches('Z');
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    None
}

/// Whole minutes elapsed between a stored timestamp and now.
/// Unparsable input reads as zero minutes old (fresh rather than expired).
pub fn minutes_since(raw: &str) -> i64 {
    match parse_timestamp(raw) {
        Some(then) => (Utc::now() - then).num_minutes(),
        None => 0,
    }
}
