//! Incident schema and dedupe identity

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use paas_core::types::{compact_timestamp, window_start};
use paas_core::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentCategory {
    Deploy,
    Health,
    Runtime,
}

impl IncidentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCategory::Deploy => "deploy",
            IncidentCategory::Health => "health",
            IncidentCategory::Runtime => "runtime",
        }
    }
}

impl fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(IncidentStatus::Open),
            "acknowledged" | "ack" => Ok(IncidentStatus::Acknowledged),
            "resolved" => Ok(IncidentStatus::Resolved),
            _ => Err(format!(
                "Invalid incident status: {} (expected open|acknowledged|resolved)",
                s
            )),
        }
    }
}

/// A single derived incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentEvent {
    pub id: String,
    pub source: String,
    pub category: IncidentCategory,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub target: String,
    pub signal: String,
    pub triggered_at: DateTime<Utc>,
    pub dedupe_key: String,
    pub window_start: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl IncidentEvent {
    /// Build an incident, deriving its signal, dedupe key, window and id
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &str,
        category: IncidentCategory,
        severity: Severity,
        message: &str,
        target: &str,
        command: &str,
        status: &str,
        triggered_at: DateTime<Utc>,
        window: TimeDelta,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let signal = normalize_signal(command, status);
        let target = target.trim().to_string();
        let dedupe_key = dedupe_key(source, category, &target, &signal);
        let window_start = window_start(&triggered_at, window).to_rfc3339_opts(SecondsFormat::Secs, true);
        let id = incident_id(&triggered_at, &dedupe_key);

        Self {
            id,
            source: source.trim().to_string(),
            category,
            severity,
            message: message.trim().to_string(),
            target,
            signal,
            triggered_at,
            dedupe_key,
            window_start,
            metadata,
        }
    }
}

/// `lower(command)_lower(status)` with runs of non-alphanumerics folded to `_`
pub fn normalize_signal(command: &str, status: &str) -> String {
    let raw = format!("{}_{}", command.trim(), status.trim()).to_lowercase();
    let mut signal = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            signal.push(c);
        } else if !signal.ends_with('_') {
            signal.push('_');
        }
    }
    let signal = signal.trim_matches('_');
    if signal.is_empty() {
        "unknown".to_string()
    } else {
        signal.to_string()
    }
}

pub fn dedupe_key(source: &str, category: IncidentCategory, target: &str, signal: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        source.trim(),
        category.as_str(),
        target.trim(),
        signal.trim()
    )
    .to_lowercase()
}

/// `inc-<YYYYMMDDTHHMMSS>-<12 hex of sha256(key)>`
pub fn incident_id(triggered_at: &DateTime<Utc>, dedupe_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(dedupe_key.as_bytes()));
    format!("inc-{}-{}", compact_timestamp(triggered_at), &digest[..12])
}
