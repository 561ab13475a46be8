//! Time formatting utilities.

use chrono::{DateTime, Utc};

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Format a relative time (past or future) as seen from `now`.
#[must_use]
pub fn format_relative_time(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(target);

    if duration.num_seconds().abs() < 60 {
        return "just now".to_string();
    }

    let minutes = duration.num_minutes().abs();
    let hours = duration.num_hours().abs();
    let days = duration.num_days().abs();

    let suffix = if duration.num_seconds() > 0 {
        "ago"
    } else {
        "from now"
    };

    if days > 0 {
        format!("{days} day{} {suffix}", plural(days))
    } else if hours > 0 {
        format!("{hours} hour{} {suffix}", plural(hours))
    } else {
        format!("{minutes} minute{} {suffix}", plural(minutes))
    }
}

/// Describe a cache expiry: `expired` once passed, otherwise relative.
#[must_use]
pub fn format_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if expiry < now {
        "expired".to_string()
    } else {
        format!("expires {}", format_relative_time(expiry, now))
    }
}
