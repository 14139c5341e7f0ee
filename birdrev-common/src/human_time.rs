//! Time value parsing and display
//!
//! Detection tables written by older ingestion tools store offsets in a mix
//! of representations. Everything is normalised to seconds (`f64`) here so
//! the rest of the workspace only ever sees numbers.
//!
//! Accepted offset forms:
//! - plain seconds: `"626"`, `"626.0"`
//! - minute/second suffix form: `"10m26s"`, `"10m"`, `"26.5s"`, `"1h2m3s"`
//! - clock form: `"10:26"`, `"1:10:26.5"`

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a stored time offset into seconds.
///
/// Returns `None` for empty, negative, non-finite or otherwise unparseable
/// input. Callers treat `None` as a malformed row.
///
/// ```
/// use birdrev_common::human_time::parse_time_value;
///
/// assert_eq!(parse_time_value("626.0"), Some(626.0));
/// assert_eq!(parse_time_value("10m26s"), Some(626.0));
/// assert_eq!(parse_time_value("10:26"), Some(626.0));
/// assert_eq!(parse_time_value("soon"), None);
/// ```
pub fn parse_time_value(raw: &str) -> Option<f64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let seconds = if let Ok(plain) = value.parse::<f64>() {
        plain
    } else if value.contains(':') {
        parse_clock(value)?
    } else {
        parse_suffixed(value)?
    };

    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}

/// `H:MM:SS(.f)` or `M:SS(.f)`
fn parse_clock(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let mut total = 0.0;
    for (idx, part) in parts.iter().enumerate() {
        let is_last = idx == parts.len() - 1;
        let component: f64 = if is_last {
            part.parse().ok()?
        } else {
            part.parse::<u32>().ok()? as f64
        };
        total = total * 60.0 + component;
    }
    Some(total)
}

/// `1h2m3.5s` with any subset of the units, in descending order
fn parse_suffixed(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut last_rank = 0u8;

    for ch in value.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }

        let (rank, scale) = match ch.to_ascii_lowercase() {
            'h' => (1, 3600.0),
            'm' => (2, 60.0),
            's' => (3, 1.0),
            _ => return None,
        };
        if rank <= last_rank || number.is_empty() {
            return None;
        }
        total += number.parse::<f64>().ok()? * scale;
        number.clear();
        last_rank = rank;
    }

    // Trailing digits without a unit
    if !number.is_empty() {
        return None;
    }
    (last_rank > 0).then_some(total)
}

/// Format an offset in seconds as `M:SS.s`, or `H:MM:SS.s` past one hour.
///
/// Used in progress and warning messages.
///
/// ```
/// use birdrev_common::human_time::format_offset;
///
/// assert_eq!(format_offset(626.0), "10:26.0");
/// assert_eq!(format_offset(3.25), "0:03.2");
/// ```
pub fn format_offset(seconds: f64) -> String {
    let negative = seconds < 0.0;
    let tenths = (seconds.abs() * 10.0).floor() as u64;
    let hours = tenths / 36_000;
    let minutes = (tenths / 600) % 60;
    let secs = (tenths % 600) as f64 / 10.0;

    let body = if hours > 0 {
        format!("{}:{:02}:{:04.1}", hours, minutes, secs)
    } else {
        format!("{}:{:04.1}", minutes, secs)
    };

    if negative {
        format!("-{}", body)
    } else {
        body
    }
}

/// Parse a stored timestamp (`created_at`, `reviewed_at`).
///
/// Handles SQLite `CURRENT_TIMESTAMP` output, ISO-8601 with or without
/// fractional seconds, and RFC 3339. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
