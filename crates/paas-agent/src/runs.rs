//! Agent run records: `events/agent-runs.jsonl`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::{PaasError, Result};
use paas_events::{EventLog, EventStream};

/// Terminal or queued state of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Blocked,
    Noop,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Blocked => "blocked",
            RunStatus::Noop => "noop",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(RunStatus::Queued),
            "blocked" => Ok(RunStatus::Blocked),
            "noop" => Ok(RunStatus::Noop),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// `run-<YYYYMMDDTHHMMSS>.<nanos>Z`
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("run-{}", now.format("%Y%m%dT%H%M%S%.9fZ"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRunRecord {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub incident_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_profile: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_auth: String,
    #[serde(default)]
    pub runtime_ready: bool,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub collected: usize,
    #[serde(default)]
    pub inserted: usize,
    #[serde(default)]
    pub updated: usize,
    #[serde(default)]
    pub pruned: usize,
    #[serde(default)]
    pub queue_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_path: Option<PathBuf>,
    #[serde(default)]
    pub collector_count: usize,
    #[serde(default)]
    pub message: String,
}

impl AgentRunRecord {
    pub fn new(agent: &str, run_id: &str, status: RunStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            agent: agent.trim().to_string(),
            run_id: run_id.trim().to_string(),
            status,
            incident_id: String::new(),
            runtime_mode: String::new(),
            runtime_profile: String::new(),
            runtime_auth: String::new(),
            runtime_ready: false,
            executed: false,
            collected: 0,
            inserted: 0,
            updated: 0,
            pruned: 0,
            queue_total: 0,
            queue_path: None,
            collector_count: 0,
            message: String::new(),
        }
    }
}

pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            path: EventLog::new(ctx).path(EventStream::AgentRuns),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &AgentRunRecord) -> Result<()> {
        if record.agent.is_empty() || record.run_id.is_empty() {
            return Err(PaasError::internal("agent run record needs agent and run_id"));
        }
        fsio::append_jsonl(&self.path, record).await
    }

    /// Newest `tail` records, optionally only those of `agent`
    pub async fn tail(&self, agent: Option<&str>, tail: usize) -> Result<Vec<AgentRunRecord>> {
        let mut records: Vec<AgentRunRecord> = fsio::read_jsonl(&self.path).await?;
        if let Some(agent) = agent.map(str::trim).filter(|a| !a.is_empty()) {
            records.retain(|r| r.agent.eq_ignore_ascii_case(agent));
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(tail.max(1));
        Ok(records)
    }
}
