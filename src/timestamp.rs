//! RFC-3339 timestamp helpers used on the wire and in `GroupState`.

use chrono::{DateTime, Utc};

/// Sentinel used for "this group/policy has never been touched".
pub const NEVER: &str = "0001-01-01T00:00:00Z";

/// Formats an instant the way the wire contract requires: RFC-3339, UTC,
/// `Z` suffix, no fractional seconds ambiguity.
pub fn format(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parses a wire timestamp, recognizing the `NEVER` sentinel.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `true` if the stored timestamp string is the "never touched" sentinel.
pub fn is_never(s: &str) -> bool {
    s == NEVER
}
