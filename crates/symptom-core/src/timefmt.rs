//! Human-readable durations for the CLI and the markdown report.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Age of a resource relative to now: `45s`, `12m`, `3h`, `2d`.
pub fn format_age(since: DateTime<Utc>) -> String {
    format_age_at(since, Utc::now())
}

pub fn format_age_at(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Elapsed time with two decimals in the largest fitting unit.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else if secs < 3600.0 {
        format!("{:.2}m", secs / 60.0)
    } else {
        format!("{:.2}h", secs / 3600.0)
    }
}
