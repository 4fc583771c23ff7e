//! Plan execution
//!
//! Plans are deferred to an external worker. The only in-process runner is the
//! offline fake codex used by smoke tests: the prompt is piped into a shell
//! command and its work report becomes the execution note.

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use paas_core::{PaasError, Result};

use crate::runtime::RuntimePlan;

pub const OFFLINE_FAKE_CODEX_ENV: &str = "PAAS_AGENT_OFFLINE_FAKE_CODEX";
pub const OFFLINE_FAKE_CODEX_CMD_ENV: &str = "PAAS_AGENT_OFFLINE_FAKE_CODEX_CMD";

pub const MODE_DEFERRED: &str = "deferred";
pub const MODE_OFFLINE_FAKE_CODEX: &str = "offline-fake-codex";

const REPORT_BEGIN: &str = "<<WORK_REPORT_BEGIN>>";
const REPORT_END: &str = "<<WORK_REPORT_END>>";
const NOTE_MAX_LEN: usize = 240;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionResult {
    pub mode: String,
    pub executed: bool,
    pub note: String,
}

/// Offline fake codex runner
#[derive(Debug, Clone)]
pub struct OfflineFakeCodex {
    pub command: String,
    pub timeout: Duration,
}

impl OfflineFakeCodex {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Build from the `PAAS_AGENT_OFFLINE_FAKE_CODEX*` values
    ///
    /// Returns `None` unless the flag is truthy; an enabled runner without a
    /// command is a usage error.
    pub fn from_env_values(
        flag: Option<&str>,
        command: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<Self>> {
        let enabled = matches!(
            flag.map(|f| f.trim().to_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        );
        if !enabled {
            return Ok(None);
        }
        let command = command.map(str::trim).filter(|c| !c.is_empty()).ok_or_else(|| {
            PaasError::usage(format!(
                "{} is set but {} is empty",
                OFFLINE_FAKE_CODEX_ENV, OFFLINE_FAKE_CODEX_CMD_ENV
            ))
        })?;
        Ok(Some(Self::new(command, timeout)))
    }

    pub async fn run(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(self.command.trim())
            .env("FAKE_CODEX_DELAY_SECONDS", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PaasError::internal(format!("failed to start offline fake codex: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = match prompt.trim() {
                "" => "deterministic remediation smoke execution",
                p => p,
            };
            let payload = format!("{}\n/exit\n", prompt);
            // The runner may exit without reading its input
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!("offline fake codex closed stdin early: {}", e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PaasError::Timeout {
                operation: "offline fake codex execution".to_string(),
                after: self.timeout,
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(PaasError::internal(format!(
                "offline fake codex execution failed: {} (output={})",
                output.status,
                compact(&combined)
            )));
        }
        let report = extract_work_report(&combined);
        if report.is_empty() {
            return Err(PaasError::internal(
                "offline fake codex execution produced no work report",
            ));
        }
        Ok(report)
    }
}

/// Text between the work report markers, or the whole output without them
pub fn extract_work_report(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find(REPORT_BEGIN) else {
        return trimmed.to_string();
    };
    let chunk = &trimmed[start + REPORT_BEGIN.len()..];
    let chunk = match chunk.find(REPORT_END) {
        Some(stop) => &chunk[..stop],
        None => chunk,
    };
    chunk.trim().to_string()
}

/// Collapse whitespace and cap at 240 chars
pub fn compact(value: &str) -> String {
    let compact = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= NOTE_MAX_LEN {
        return compact;
    }
    let head: String = compact.chars().take(NOTE_MAX_LEN - 3).collect();
    format!("{}...", head.trim_end())
}

/// Execute a plan, or record why it is deferred
pub async fn execute(plan: &RuntimePlan, runner: Option<&OfflineFakeCodex>) -> Result<ExecutionResult> {
    if !plan.ready {
        return Ok(ExecutionResult {
            mode: MODE_DEFERRED.to_string(),
            executed: false,
            note: "runtime adapter not ready; execution deferred".to_string(),
        });
    }
    let Some(runner) = runner else {
        return Ok(ExecutionResult {
            mode: MODE_DEFERRED.to_string(),
            executed: false,
            note: "runtime action queued for worker execution".to_string(),
        });
    };
    let report = runner.run(&plan.prompt).await?;
    Ok(ExecutionResult {
        mode: MODE_OFFLINE_FAKE_CODEX.to_string(),
        executed: true,
        note: compact(&report),
    })
}
