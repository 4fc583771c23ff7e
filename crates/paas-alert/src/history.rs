//! Alert history on the `alerts` event stream

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use paas_core::layout::ContextPaths;
use paas_core::{Result, Severity};
use paas_events::{EventLog, EventRecord, EventStream};

pub const ALERT_SOURCE: &str = "alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Sent,
    Failed,
    DryRun,
    Suppressed,
    Logged,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Sent => "sent",
            AlertStatus::Failed => "failed",
            AlertStatus::DryRun => "dry_run",
            AlertStatus::Suppressed => "suppressed",
            AlertStatus::Logged => "logged",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One history row before it is stamped
#[derive(Debug, Clone)]
pub struct AlertEntry {
    pub command: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub target: String,
    pub message: String,
    pub guidance: Option<String>,
    pub fields: BTreeMap<String, String>,
}

pub struct AlertHistory {
    log: EventLog,
}

impl AlertHistory {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            log: EventLog::new(ctx),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.log.path(EventStream::Alerts)
    }

    pub async fn record(&self, entry: AlertEntry) -> Result<EventRecord> {
        let mut record = EventRecord::new(
            ALERT_SOURCE,
            entry.command.trim(),
            entry.status.as_str(),
            entry.message.trim(),
        )
        .with_severity(entry.severity)
        .with_target(entry.target.trim())
        .with_fields(&entry.fields);
        if let Some(guidance) = entry.guidance.filter(|g| !g.trim().is_empty()) {
            record = record.with_guidance(guidance.trim());
        }
        self.log.append(EventStream::Alerts, record).await
    }

    /// Last `limit` rows in file order, optionally for one severity
    pub async fn list(&self, limit: usize, severity: Option<Severity>) -> Result<Vec<EventRecord>> {
        let mut rows = self.log.read(EventStream::Alerts).await?;
        if let Some(severity) = severity {
            rows.retain(|r| r.severity == severity);
        }
        let limit = limit.max(1);
        if rows.len() > limit {
            rows.drain(..rows.len() - limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::StateRoot;
    use tempfile::TempDir;

    fn entry(severity: Severity, message: &str) -> AlertEntry {
        AlertEntry {
            command: "alert test".into(),
            severity,
            status: AlertStatus::Logged,
            target: String::new(),
            message: message.into(),
            guidance: Some("  ".into()),
            fields: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_list_keeps_newest_rows() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StateRoot::new(temp_dir.path()).context("default").unwrap();
        let history = AlertHistory::new(&ctx);

        for (i, severity) in [Severity::Info, Severity::Warning, Severity::Info, Severity::Info]
            .into_iter()
            .enumerate()
        {
            history.record(entry(severity, &format!("m{}", i))).await.unwrap();
        }

        let rows = history.list(2, None).await.unwrap();
        let messages: Vec<_> = rows.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["m2", "m3"]);

        let warnings = history.list(10, Some(Severity::Warning)).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].source, ALERT_SOURCE);
        assert_eq!(warnings[0].status, "logged");
        assert!(warnings[0].guidance.is_none());
    }
}
