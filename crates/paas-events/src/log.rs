//! Append-only JSONL event streams
//!
//! Each stream is a file under `events/`. Records are appended one line per
//! write and never edited in place; only `prune_before` rewrites a stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::redact::redact_fields;
use paas_core::{PaasError, Result, Severity};

/// Event stream files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStream {
    Deployments,
    Alerts,
    Audit,
    AgentRuns,
    Incidents,
}

impl EventStream {
    pub const ALL: [EventStream; 5] = [
        EventStream::Deployments,
        EventStream::Alerts,
        EventStream::Audit,
        EventStream::AgentRuns,
        EventStream::Incidents,
    ];

    /// Streams of plain event records (what collectors and `events list` read)
    pub const RECORDS: [EventStream; 3] = [
        EventStream::Deployments,
        EventStream::Alerts,
        EventStream::Audit,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            EventStream::Deployments => "deployments.jsonl",
            EventStream::Alerts => "alerts.jsonl",
            EventStream::Audit => "audit.jsonl",
            EventStream::AgentRuns => "agent-runs.jsonl",
            EventStream::Incidents => "incidents.jsonl",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStream::Deployments => "deployments",
            EventStream::Alerts => "alerts",
            EventStream::Audit => "audit",
            EventStream::AgentRuns => "agent-runs",
            EventStream::Incidents => "incidents",
        }
    }
}

impl fmt::Display for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStream {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployments" | "deploy" => Ok(EventStream::Deployments),
            "alerts" | "alert" => Ok(EventStream::Alerts),
            "audit" => Ok(EventStream::Audit),
            "agent-runs" => Ok(EventStream::AgentRuns),
            "incidents" => Ok(EventStream::Incidents),
            _ => Err(format!("Invalid event stream: {}", s)),
        }
    }
}

fn lenient_severity<'de, D>(deserializer: D) -> std::result::Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| Severity::normalize(&s)).unwrap_or_default())
}

/// One line of an event stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl EventRecord {
    pub fn new(
        source: impl Into<String>,
        command: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            command: command.into(),
            status: status.into(),
            severity: Severity::Info,
            target: String::new(),
            message: message.into(),
            context: String::new(),
            guidance: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn with_fields(mut self, fields: &BTreeMap<String, String>) -> Self {
        for (k, v) in fields {
            self.fields.insert(k.clone(), v.clone());
        }
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("source", &self.source),
            ("command", &self.command),
            ("status", &self.status),
            ("message", &self.message),
        ] {
            if value.trim().is_empty() {
                return Err(PaasError::internal(format!(
                    "event record is missing required field {:?}",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Filter for [`EventLog::list`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub limit: Option<usize>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub severity: Option<Severity>,
}

impl EventFilter {
    fn matches(&self, record: &EventRecord) -> bool {
        let eq = |want: &Option<String>, have: &str| {
            want.as_deref()
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(|w| w.eq_ignore_ascii_case(have.trim()))
                .unwrap_or(true)
        };
        eq(&self.source, &record.source)
            && eq(&self.status, &record.status)
            && self.severity.map(|s| s == record.severity).unwrap_or(true)
    }
}

/// Event streams of one context
#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
    context: String,
}

impl EventLog {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            dir: ctx.events_dir(),
            context: ctx.name().to_string(),
        }
    }

    pub fn path(&self, stream: EventStream) -> PathBuf {
        self.dir.join(stream.file_name())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stamp `record` with the current time and append it
    pub async fn append(&self, stream: EventStream, record: EventRecord) -> Result<EventRecord> {
        self.append_at(stream, record, Utc::now()).await
    }

    /// Append with an explicit timestamp
    pub async fn append_at(
        &self,
        stream: EventStream,
        mut record: EventRecord,
        timestamp: DateTime<Utc>,
    ) -> Result<EventRecord> {
        record.validate()?;
        record.timestamp = timestamp;
        if record.context.trim().is_empty() {
            record.context = self.context.clone();
        }
        record.fields = redact_fields(&record.fields);

        fsio::append_jsonl(&self.path(stream), &record).await?;
        debug!(
            "Appended {} event {}/{} to {}",
            stream, record.source, record.status, stream
        );
        Ok(record)
    }

    /// All parseable records of a stream, in file order
    pub async fn read(&self, stream: EventStream) -> Result<Vec<EventRecord>> {
        fsio::read_jsonl(&self.path(stream)).await
    }

    /// Newest `limit` records across `streams`, newest first
    pub async fn recent(&self, streams: &[EventStream], limit: usize) -> Result<Vec<EventRecord>> {
        let mut records = Vec::new();
        for stream in streams {
            records.extend(self.read(*stream).await?);
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    /// Records of the record streams matching `filter`, newest first
    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let mut records = Vec::new();
        for stream in EventStream::RECORDS {
            records.extend(
                self.read(stream)
                    .await?
                    .into_iter()
                    .filter(|r| filter.matches(r)),
            );
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit.filter(|l| *l > 0) {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Drop records older than `cutoff` from every timestamped stream
    ///
    /// Lines without a parseable `timestamp` are kept untouched. Returns the
    /// number of removed lines.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for stream in [
            EventStream::Deployments,
            EventStream::Alerts,
            EventStream::Audit,
            EventStream::AgentRuns,
        ] {
            let path = self.path(stream);
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut kept = String::with_capacity(content.len());
            let mut dropped = 0;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if record_timestamp(line).map(|ts| ts < cutoff).unwrap_or(false) {
                    dropped += 1;
                    continue;
                }
                kept.push_str(line);
                kept.push('\n');
            }

            if dropped > 0 {
                fsio::write_atomic(&path, kept.as_bytes()).await?;
                debug!("Pruned {} records from {}", dropped, stream);
            }
            removed += dropped;
        }
        Ok(removed)
    }
}

fn record_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let raw = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use paas_core::StateRoot;
    use tempfile::TempDir;

    fn log(temp_dir: &TempDir) -> EventLog {
        EventLog::new(&StateRoot::new(temp_dir.path()).context("default").unwrap())
    }

    #[tokio::test]
    async fn test_append_stamps_and_redacts() {
        let temp_dir = TempDir::new().unwrap();
        let log = log(&temp_dir);

        let record = EventRecord::new("deploy", "deploy apply", "failed", "compose up failed")
            .with_target("edge-a")
            .with_field("api_token", "abc")
            .with_field("release", "rel-1");
        let stored = log.append(EventStream::Deployments, record).await.unwrap();
        assert_eq!(stored.context, "default");
        assert_eq!(stored.fields["api_token"], "<redacted>");

        let raw = std::fs::read_to_string(log.path(EventStream::Deployments)).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(!raw.contains("abc"));

        let records = log.read(EventStream::Deployments).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_append_requires_fields() {
        let temp_dir = TempDir::new().unwrap();
        let log = log(&temp_dir);
        let err = log
            .append(EventStream::Audit, EventRecord::new("audit", "", "failed", "x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[tokio::test]
    async fn test_lenient_parse_of_foreign_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = log(&temp_dir);
        let path = log.path(EventStream::Alerts);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "{\"timestamp\":\"2026-01-01T00:00:00Z\",\"source\":\"alert\",\"command\":\"ingress tls\",\"status\":\"retrying\",\"severity\":\"ERROR\",\"message\":\"acme\"}\nnot-json\n",
        )
        .unwrap();

        let records = log.read(EventStream::Alerts).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let temp_dir = TempDir::new().unwrap();
        let log = log(&temp_dir);
        let t0 = Utc::now() - TimeDelta::minutes(10);

        log.append_at(
            EventStream::Deployments,
            EventRecord::new("deploy", "deploy", "succeeded", "ok"),
            t0,
        )
        .await
        .unwrap();
        log.append_at(
            EventStream::Audit,
            EventRecord::new("audit", "target add", "failed", "dup"),
            t0 + TimeDelta::minutes(1),
        )
        .await
        .unwrap();
        log.append_at(
            EventStream::Deployments,
            EventRecord::new("deploy", "deploy", "failed", "boom"),
            t0 + TimeDelta::minutes(2),
        )
        .await
        .unwrap();

        let all = log.list(&EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "boom");

        let failed_deploys = log
            .list(&EventFilter {
                source: Some("deploy".into()),
                status: Some("FAILED".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed_deploys.len(), 1);

        let limited = log
            .list(&EventFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_before_keeps_recent_and_unparseable() {
        let temp_dir = TempDir::new().unwrap();
        let log = log(&temp_dir);
        let now = Utc::now();

        log.append_at(
            EventStream::Deployments,
            EventRecord::new("deploy", "deploy", "succeeded", "old"),
            now - TimeDelta::days(40),
        )
        .await
        .unwrap();
        log.append_at(
            EventStream::Deployments,
            EventRecord::new("deploy", "deploy", "succeeded", "new"),
            now,
        )
        .await
        .unwrap();
        let path = log.path(EventStream::Deployments);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"note\":\"no timestamp\"}\n");
        std::fs::write(&path, content).unwrap();

        let removed = log.prune_before(now - TimeDelta::days(30)).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = std::fs::read_to_string(&path).unwrap();
        assert_eq!(remaining.lines().count(), 2);
        assert!(!remaining.contains("\"old\""));
    }
}
