//! Remote execution over ssh/scp

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

use paas_core::{PaasError, Result, Target};

/// Environment variable naming the ssh binary
pub const SSH_BIN_ENV: &str = "PAAS_SSH_BIN";
/// Environment variable naming the scp binary
pub const SCP_BIN_ENV: &str = "PAAS_SCP_BIN";

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Output from a remote command
#[derive(Debug, Clone, Default)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl From<Output> for RemoteOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

impl RemoteOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        }
    }
}

/// Trait for running commands on a target (allows mocking in tests)
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the target
    async fn run(&self, target: &Target, command: &str, timeout: Duration) -> Result<RemoteOutput>;

    /// Copy one local file to `remote_path` on the target
    async fn upload(
        &self,
        target: &Target,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<()>;
}

/// Real transport shelling out to `ssh` and `scp`
///
/// Host keys are always checked strictly and prompts are disabled, so a
/// missing `known_hosts` entry is a hard failure.
#[derive(Debug, Clone)]
pub struct SshTransport {
    ssh_bin: PathBuf,
    scp_bin: PathBuf,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SshTransport {
    pub fn new(ssh_bin: Option<PathBuf>, scp_bin: Option<PathBuf>) -> Self {
        let pick = |bin: Option<PathBuf>, default: &str| {
            bin.filter(|b| !b.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(default))
        };
        Self {
            ssh_bin: pick(ssh_bin, "ssh"),
            scp_bin: pick(scp_bin, "scp"),
        }
    }

    fn common_options() -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=yes".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
        ]
    }

    fn destination(target: &Target) -> String {
        format!("{}@{}", target.user, target.host)
    }

    pub fn ssh_args(target: &Target, command: &str) -> Vec<String> {
        let mut args = Self::common_options();
        args.push("-p".into());
        args.push(target.port.to_string());
        args.push(Self::destination(target));
        args.push(command.to_string());
        args
    }

    pub fn scp_args(target: &Target, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = Self::common_options();
        args.push("-P".into());
        args.push(target.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", Self::destination(target), remote_path));
        args
    }

    async fn spawn(
        &self,
        bin: &Path,
        args: Vec<String>,
        operation: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput> {
        let mut command = Command::new(bin);
        command.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| PaasError::Timeout {
                operation: operation.to_string(),
                after: timeout,
            })?
            .map_err(|e| {
                PaasError::Transport(format!("failed to execute {}: {}", bin.display(), e))
            })?;
        Ok(RemoteOutput::from(output))
    }
}

#[async_trait]
impl RemoteExecutor for SshTransport {
    #[instrument(skip(self, command), fields(target = %target.name))]
    async fn run(&self, target: &Target, command: &str, timeout: Duration) -> Result<RemoteOutput> {
        debug!("ssh {}: {}", target.name, command);
        let output = self
            .spawn(
                &self.ssh_bin,
                Self::ssh_args(target, command),
                "ssh command",
                timeout,
            )
            .await?;
        if !output.success {
            debug!("ssh command failed: {}", output.stderr.trim());
        }
        Ok(output)
    }

    #[instrument(skip(self, local), fields(target = %target.name))]
    async fn upload(
        &self,
        target: &Target,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<()> {
        let output = self
            .spawn(
                &self.scp_bin,
                Self::scp_args(target, local, remote_path),
                "scp upload",
                timeout,
            )
            .await?;
        if !output.success {
            return Err(PaasError::Transport(format!(
                "scp {} to {}:{} failed: {}",
                local.display(),
                target.name,
                remote_path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

/// One call seen by [`MockExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Run { target: String, command: String },
    Upload { target: String, remote_path: String },
}

/// Mock executor for testing
///
/// Every call succeeds unless a registered failure pattern is contained in
/// the command (or remote path, for uploads). Commands matching a timeout
/// pattern fail with `Timeout`.
#[derive(Clone, Default)]
pub struct MockExecutor {
    failures: Vec<(String, RemoteOutput)>,
    timeouts: Vec<String>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, pattern: &str, stderr: &str) -> Self {
        self.failures
            .push((pattern.to_string(), RemoteOutput::failed(stderr)));
        self
    }

    pub fn with_timeout(mut self, pattern: &str) -> Self {
        self.timeouts.push(pattern.to_string());
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn failure_for(&self, subject: &str) -> Option<RemoteOutput> {
        self.failures
            .iter()
            .find(|(pattern, _)| subject.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, target: &Target, command: &str, timeout: Duration) -> Result<RemoteOutput> {
        self.record(MockCall::Run {
            target: target.name.clone(),
            command: command.to_string(),
        });
        if self.timeouts.iter().any(|p| command.contains(p.as_str())) {
            return Err(PaasError::Timeout {
                operation: format!("ssh command on {}", target.name),
                after: timeout,
            });
        }
        Ok(self
            .failure_for(command)
            .unwrap_or_else(|| RemoteOutput::ok("")))
    }

    async fn upload(
        &self,
        target: &Target,
        _local: &Path,
        remote_path: &str,
        _timeout: Duration,
    ) -> Result<()> {
        self.record(MockCall::Upload {
            target: target.name.clone(),
            remote_path: remote_path.to_string(),
        });
        match self.failure_for(remote_path) {
            Some(output) => Err(PaasError::Transport(output.stderr)),
            None => Ok(()),
        }
    }
}
