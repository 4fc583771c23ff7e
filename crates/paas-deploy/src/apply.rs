//! Ship a release bundle to one target and converge it with docker compose

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

use paas_compose::commands::{health_check_command, pull_command, quote_single, up_command};
use paas_compose::{read_manifest, BundleRef};
use paas_core::config::TimeoutConfig;
use paas_core::{PaasError, Result, Target};

use crate::transport::RemoteExecutor;

/// Knobs for [`apply_bundle`]
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Remote directory holding `<app>/<release_id>/`
    pub remote_root: String,
    pub health_check: bool,
    pub scp_timeout: Duration,
    pub apply_timeout: Duration,
    pub pull_timeout: Duration,
}

impl ApplyOptions {
    pub fn new(remote_root: impl Into<String>, timeouts: &TimeoutConfig) -> Self {
        Self {
            remote_root: remote_root.into(),
            health_check: false,
            scp_timeout: timeouts.scp_upload(),
            apply_timeout: timeouts.compose_apply(),
            pull_timeout: timeouts.compose_pull(),
        }
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }
}

/// What happened on one target
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub target: String,
    pub remote_dir: String,
    pub uploaded: usize,
    pub pulled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<bool>,
}

/// `<remote_root>/<app>/<release_id>`
pub fn remote_release_dir(remote_root: &str, app: &str, release_id: &str) -> String {
    let root = remote_root.trim_end_matches('/');
    let root = if root.is_empty() { "/" } else { root };
    format!("{}/{}/{}", root.trim_end_matches('/'), app, release_id)
}

async fn bundle_files(bundle: &BundleRef) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&bundle.dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Upload `bundle` to `target` and bring the stack up
///
/// Files land in a hidden sibling directory first and are moved into place in
/// one `mv`. An existing remote release directory is left untouched, so
/// re-applying a release only re-runs compose. A failed upload stops before
/// any compose command runs; a failed pull only warns.
#[instrument(skip(executor, bundle, opts), fields(target = %target.name, release = %bundle.release_id()))]
pub async fn apply_bundle(
    executor: &dyn RemoteExecutor,
    target: &Target,
    bundle: &BundleRef,
    opts: &ApplyOptions,
) -> Result<ApplyOutcome> {
    let meta = &bundle.metadata;
    let remote_dir = remote_release_dir(&opts.remote_root, &meta.app, &meta.release_id);
    let parent = remote_dir
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_else(|| "/".to_string());
    let staging = format!(
        "{}/.{}.tmp-{}",
        parent,
        meta.release_id,
        uuid::Uuid::new_v4().simple()
    );

    let files = bundle_files(bundle).await?;
    let manifest = read_manifest(&bundle.dir).await?;

    run_checked(
        executor,
        target,
        &format!("mkdir -p {}", quote_single(&staging)),
        opts.scp_timeout,
        "create staging directory",
    )
    .await?;

    for (name, local) in &files {
        executor
            .upload(
                target,
                local,
                &format!("{}/{}", staging, name),
                opts.scp_timeout,
            )
            .await?;
    }

    let promote = format!(
        "if [ -d {dir} ]; then rm -rf {staging}; else mv {staging} {dir}; fi",
        dir = quote_single(&remote_dir),
        staging = quote_single(&staging)
    );
    run_checked(executor, target, &promote, opts.scp_timeout, "promote release").await?;
    info!("Uploaded {} files to {}:{}", files.len(), target.name, remote_dir);

    let cd = format!("cd {}", quote_single(&remote_dir));
    // A failed pull falls back to images already on the host
    let pulled = match executor
        .run(
            target,
            &format!("{} && {}", cd, pull_command(&manifest)),
            opts.pull_timeout,
        )
        .await
    {
        Ok(pull) if pull.success => true,
        Ok(pull) => {
            warn!(
                "compose pull failed on {}; continuing with local images: {}",
                target.name,
                pull.stderr.trim()
            );
            false
        }
        Err(e) => {
            warn!(
                "compose pull failed on {}; continuing with local images: {}",
                target.name, e
            );
            false
        }
    };

    run_checked(
        executor,
        target,
        &format!("{} && {}", cd, up_command(&manifest)),
        opts.apply_timeout,
        "compose up",
    )
    .await?;

    let health = if opts.health_check {
        run_checked(
            executor,
            target,
            &format!("{} && {}", cd, health_check_command(&manifest)),
            opts.apply_timeout,
            "health check",
        )
        .await?;
        Some(true)
    } else {
        None
    };

    Ok(ApplyOutcome {
        target: target.name.clone(),
        remote_dir,
        uploaded: files.len(),
        pulled,
        health,
    })
}

async fn run_checked(
    executor: &dyn RemoteExecutor,
    target: &Target,
    command: &str,
    timeout: Duration,
    step: &str,
) -> Result<()> {
    let output = executor.run(target, command, timeout).await?;
    if output.success {
        return Ok(());
    }
    let detail = output.stderr.trim();
    let detail = if detail.is_empty() {
        output.stdout.trim()
    } else {
        detail
    };
    Err(PaasError::Transport(format!(
        "{} failed on {}: {}",
        step, target.name, detail
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_release_dir() {
        assert_eq!(
            remote_release_dir("/opt/paas/releases/", "api", "rel-1"),
            "/opt/paas/releases/api/rel-1"
        );
        assert_eq!(remote_release_dir("", "api", "rel-1"), "/api/rel-1");
    }

    #[test]
    fn test_options_take_config_timeouts() {
        let timeouts = TimeoutConfig::default();
        let opts = ApplyOptions::new("/srv", &timeouts).with_health_check(true);
        assert_eq!(opts.scp_timeout, Duration::from_secs(30));
        assert_eq!(opts.apply_timeout, Duration::from_secs(600));
        assert!(opts.health_check);
    }
}
