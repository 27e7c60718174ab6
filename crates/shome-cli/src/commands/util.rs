//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use shome_core::{Period, Value};

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(second|minute|hour|day|week)s?\s+ago$")
        .expect("relative time pattern is valid")
});

/// Conservative bounds for relative time parsing (~1000 years in seconds).
const MAX_RELATIVE_SECONDS: i64 = 1000 * 365 * 24 * 60 * 60;

/// Naive formats accepted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an absolute timestamp: RFC 3339, or naive ISO 8601 treated as UTC.
pub fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    anyhow::bail!("Invalid timestamp: {s}. Use RFC 3339 (e.g., 2024-03-01T10:00:00Z)")
}

/// Parse a datetime string as either an absolute timestamp or relative time.
///
/// Supports:
/// - RFC 3339: "2024-03-01T10:00:00Z"
/// - Naive ISO 8601, read as UTC: "2024-03-01T10:00:00"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_datetime_at(s, Utc::now())
}

fn parse_datetime_at(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = parse_timestamp(s) {
        return Ok(dt);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s.trim()) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use RFC 3339 (e.g., 2024-03-01T10:00:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let seconds_per_unit = match &caps[2] {
        "second" => 1,
        "minute" => 60,
        "hour" => 60 * 60,
        "day" => 60 * 60 * 24,
        "week" => 60 * 60 * 24 * 7,
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > MAX_RELATIVE_SECONDS / seconds_per_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    Ok(now - Duration::seconds(n * seconds_per_unit))
}

/// Parse `--start`/`--end` arguments into a period.
pub fn parse_period(start: &str, end: &str) -> anyhow::Result<Period> {
    let start = parse_datetime(start).context("invalid --start")?;
    let end = parse_datetime(end).context("invalid --end")?;
    if start > end {
        tracing::warn!(%start, %end, "period start is after its end; results will be empty");
    }
    Ok(Period::new(start, end))
}

/// Format a timestamp for display (millisecond precision, `Z` suffix).
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Human-readable rendering of a reading value.
pub fn display_value(value: &Value) -> String {
    value
        .as_quantity()
        .map_or_else(|| value.value_to_string(), |quantity| quantity.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use shome_core::Unit;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_datetime_at("2024-03-01T12:00:00+02:00", now()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_naive_iso_as_utc() {
        assert_eq!(
            parse_timestamp("2024-03-01T10:00:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("2024-03-01 10:00:00.5").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + Duration::milliseconds(500)
        );
    }

    #[test]
    fn parses_relative_times() {
        assert_eq!(
            parse_datetime_at("2 hours ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_datetime_at("1 day ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(
            parse_datetime_at("90 seconds ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 58, 30).unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_datetime_at("yesterday-ish", now()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid datetime: yesterday-ish"));
        assert!(parse_timestamp("2 hours ago").is_err());
    }

    #[test]
    fn rejects_huge_relative_values() {
        let err = parse_datetime_at("99999999 weeks ago", now()).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn displays_quantities_with_unit_symbol() {
        assert_eq!(display_value(&Value::quantity(Unit::Celsius, 20.0)), "20.0 °C");
        assert_eq!(display_value(&Value::Switch { on: false }), "false");
    }
}
