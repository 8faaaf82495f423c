//! Parsing helpers for the time values that appear in user config files.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::ConfigError;

/// Informal zone names people actually type, mapped to IANA names.
const TIME_ZONE_ALIASES: &[(&str, &str)] = &[
    ("utc", "UTC"),
    ("est", "America/New_York"),
    ("edt", "America/New_York"),
    ("pst", "America/Los_Angeles"),
    ("pdt", "America/Los_Angeles"),
    ("cst", "America/Chicago"),
    ("cdt", "America/Chicago"),
    ("mst", "America/Denver"),
    ("mdt", "America/Denver"),
    ("new york", "America/New_York"),
    ("los angeles", "America/Los_Angeles"),
    ("tokyo", "Asia/Tokyo"),
    ("london", "Europe/London"),
    ("paris", "Europe/Paris"),
    ("dubai", "Asia/Dubai"),
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const TIME_OF_DAY_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Resolve an alias or IANA zone name.
pub fn parse_time_zone(input: &str) -> Result<Tz, ConfigError> {
    let key = input.trim().to_lowercase();
    let resolved = TIME_ZONE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, name)| *name)
        .unwrap_or_else(|| input.trim());

    resolved
        .parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(input.to_string()))
}

/// Parse an instant. Inputs carrying an offset (RFC 3339) are taken as-is;
/// wall-clock inputs are interpreted in `tz`.
pub fn parse_datetime(input: &str, tz: Tz) -> Result<DateTime<Utc>, ConfigError> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ConfigError::InvalidTime(input.to_string()))?;

    // A wall-clock time inside a DST gap has no instant
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ConfigError::InvalidTime(input.to_string()))
}

/// Parse a wall-clock time of day (`HH:MM` or `HH:MM:SS`).
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, ConfigError> {
    let input = input.trim();
    TIME_OF_DAY_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| ConfigError::InvalidTime(input.to_string()))
}

/// Parse a duration: `HH:MM:SS`, `HH:MM`, a bare number of minutes, or `max`.
pub fn parse_duration(input: &str) -> Result<TimeDelta, ConfigError> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("max") {
        return Ok(TimeDelta::MAX);
    }

    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let parts = input
        .split(':')
        .map(|p| p.trim().parse::<i64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;

    let delta = match parts.as_slice() {
        [h, m, s] => TimeDelta::try_hours(*h)
            .zip(TimeDelta::try_minutes(*m))
            .zip(TimeDelta::try_seconds(*s))
            .and_then(|((h, m), s)| h.checked_add(&m)?.checked_add(&s)),
        [h, m] => TimeDelta::try_hours(*h)
            .zip(TimeDelta::try_minutes(*m))
            .and_then(|(h, m)| h.checked_add(&m)),
        [m] => TimeDelta::try_minutes(*m),
        _ => None,
    };
    let delta = delta.ok_or_else(invalid)?;
    if delta < TimeDelta::zero() {
        return Err(invalid());
    }
    Ok(delta)
}
