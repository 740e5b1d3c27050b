//! Formatting helpers shared by the engine and the CLI.

use chrono::{DateTime, TimeZone, Utc};

/// Convert epoch milliseconds to a UTC timestamp.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// ISO 8601 in UTC without fractional seconds, e.g. `2025-01-02T03:04:05Z`.
pub fn format_iso_seconds(ms: i64) -> String {
    match from_millis(ms) {
        Some(ts) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => ms.to_string(),
    }
}

/// Compact elapsed time using the two largest units: `2d3h`, `1h30m`, `5m12s`, `42s`.
///
/// Negative spans are shown as `0s`.
pub fn format_elapsed(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// `"{start}: {elapsed}"` for a background task row.
pub fn format_timeline(start_ms: i64, end_ms: i64) -> String {
    format!(
        "{}: {}",
        format_iso_seconds(start_ms),
        format_elapsed(end_ms.saturating_sub(start_ms))
    )
}

/// Format a timestamp relative to `now_ms` (e.g., "2m ago").
pub fn format_relative_time(ts_ms: i64, now_ms: i64) -> String {
    let secs = now_ms.saturating_sub(ts_ms) / 1000;

    if secs < 0 {
        "just now".to_string()
    } else if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else if secs < 7 * 86_400 {
        format!("{}d ago", secs / 86_400)
    } else {
        from_millis(ts_ms)
            .map(|ts| ts.format("%b %d").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Format an optional timestamp as relative time, or a dash if missing.
pub fn format_relative_time_opt(ts_ms: Option<i64>, now_ms: i64) -> String {
    match ts_ms {
        Some(ts) => format_relative_time(ts, now_ms),
        None => "-".to_string(),
    }
}
