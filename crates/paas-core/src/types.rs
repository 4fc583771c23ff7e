//! Shared value types: severities, slugs, timestamps

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::{PaasError, Result};

/// Severity shared by events, incidents and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Ordering used for monotonic escalation (critical > warning > info)
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }

    /// Lenient mapping for free-form input found in event logs
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "error" | "fatal" => Severity::Critical,
            "warning" | "warn" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn max(self, other: Severity) -> Severity {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {} (expected info|warning|critical)", s)),
        }
    }
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static slug regex"))
}

/// Validate a user-supplied name (targets, apps, agents, addons)
pub fn validate_slug(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PaasError::usage(format!("{} name is required", kind)));
    }
    if !slug_re().is_match(name) {
        return Err(PaasError::usage(format!(
            "invalid {} name {:?}: expected [a-zA-Z0-9_-]+",
            kind, name
        )));
    }
    Ok(name.to_string())
}

/// Reduce an arbitrary string to a single safe path segment
///
/// Keeps ASCII alphanumerics and `-_.`, collapses every other run into `-`,
/// trims separators from both ends and falls back to `unknown`.
pub fn sanitize_path_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches(|c| matches!(c, '-' | '.' | '_'));
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Upper-case key segment used by namespaced secret keys
pub fn env_key_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "DEFAULT".to_string()
    } else {
        trimmed.to_string()
    }
}

/// RFC3339 with nanoseconds, UTC `Z` suffix
pub fn rfc3339_nanos(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// `YYYYMMDDTHHMMSS` form used in identifiers
pub fn compact_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S").to_string()
}

/// Truncate a timestamp down to the start of its window
pub fn window_start(ts: &DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    if window <= TimeDelta::zero() {
        return *ts;
    }
    ts.duration_trunc(window).unwrap_or(*ts)
}

/// Parse durations like `720h`, `30m`, `14d`, `90s`
pub fn parse_duration(value: &str) -> Result<TimeDelta> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: i64 = digits
        .parse()
        .map_err(|_| PaasError::usage(format!("invalid duration {:?}", value)))?;
    let delta = match unit {
        "s" => TimeDelta::try_seconds(amount),
        "m" => TimeDelta::try_minutes(amount),
        "h" | "" => TimeDelta::try_hours(amount),
        "d" => TimeDelta::try_days(amount),
        _ => None,
    };
    delta.ok_or_else(|| PaasError::usage(format!("invalid duration {:?}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_severity_rank_and_escalation() {
        assert!(Severity::Critical.rank() > Severity::Warning.rank());
        assert_eq!(Severity::Warning.max(Severity::Info), Severity::Warning);
        assert_eq!(Severity::Info.max(Severity::Critical), Severity::Critical);
    }

    #[test]
    fn test_severity_normalize() {
        assert_eq!(Severity::normalize("ERROR"), Severity::Critical);
        assert_eq!(Severity::normalize("warn"), Severity::Warning);
        assert_eq!(Severity::normalize(""), Severity::Info);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_validate_slug() {
        assert_eq!(validate_slug("target", " edge-a ").unwrap(), "edge-a");
        assert!(validate_slug("target", "edge/a").is_err());
        assert!(validate_slug("target", "").is_err());
    }

    #[test]
    fn test_sanitize_path_segment() {
        assert_eq!(sanitize_path_segment("Redis Cache!"), "Redis-Cache");
        assert_eq!(sanitize_path_segment("../.."), "unknown");
        assert_eq!(sanitize_path_segment("a/b"), "a-b");
    }

    #[test]
    fn test_env_key_segment() {
        assert_eq!(env_key_segment("billing-api"), "BILLING_API");
        assert_eq!(env_key_segment(""), "DEFAULT");
    }

    #[test]
    fn test_window_start_truncates_to_five_minutes() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 42).unwrap();
        let start = window_start(&ts, TimeDelta::minutes(5));
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("720h").unwrap(), TimeDelta::hours(720));
        assert_eq!(parse_duration("14d").unwrap(), TimeDelta::days(14));
        assert_eq!(parse_duration("30m").unwrap(), TimeDelta::minutes(30));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5y").is_err());
    }
}
