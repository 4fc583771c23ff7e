//! State root and per-context directory layout
//!
//! All persisted paths are resolved here:
//!
//! ```text
//! <state_root>/
//!   current_context
//!   config.toml
//!   contexts/<name>/
//!     config.json
//!     targets/targets.json
//!     agents/agents.json
//!     agents/locks/<agent>.lock.json
//!     alerts/telegram.json, alerts/policy.json
//!     addons/addons.json
//!     events/{deployments,alerts,audit,agent-runs,incidents}.jsonl
//!     releases/<app>/<release_id>/
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::PaasConfig;
use crate::fsio;
use crate::{PaasError, Result};

/// Environment variable overriding the state root
pub const STATE_ROOT_ENV: &str = "PAAS_STATE_ROOT";

/// Name used when no context is selected
pub const DEFAULT_CONTEXT: &str = "default";

const CURRENT_CONTEXT_FILE: &str = "current_context";

/// Reject anything that is not a single, plain path segment
pub fn check_segment(segment: &str) -> Result<&str> {
    let trimmed = segment.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains('\0')
    {
        return Err(PaasError::usage(format!(
            "invalid path segment {:?}: names must not contain path separators",
            segment
        )));
    }
    Ok(trimmed)
}

/// Root of all paas state, shared across contexts
#[derive(Debug, Clone)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from an explicit override, else `<home>/.si/paas`
    pub fn resolve(override_root: Option<&str>) -> Result<Self> {
        if let Some(root) = override_root.map(str::trim).filter(|r| !r.is_empty()) {
            return Ok(Self::new(root));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| PaasError::internal("unable to determine home directory"))?;
        Ok(Self::new(home.join(".si").join("paas")))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn load_config(&self) -> Result<PaasConfig> {
        PaasConfig::load_or_default(&self.root)
    }

    /// Paths for a named context
    pub fn context(&self, name: &str) -> Result<ContextPaths> {
        let name = check_segment(name)?;
        Ok(ContextPaths {
            name: name.to_string(),
            root: self.root.join("contexts").join(name),
        })
    }

    /// The persisted current context, if any
    pub async fn current_context(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(CURRENT_CONTEXT_FILE)).await {
            Ok(content) => {
                let name = content.trim();
                if name.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(name.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_current_context(&self, name: &str) -> Result<()> {
        let name = check_segment(name)?;
        fsio::write_atomic(
            &self.root.join(CURRENT_CONTEXT_FILE),
            format!("{}\n", name).as_bytes(),
        )
        .await
    }

    /// Select a context: explicit flag, else persisted selection, else `default`
    pub async fn select_context(&self, explicit: Option<&str>) -> Result<ContextPaths> {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            return self.context(name);
        }
        match self.current_context().await? {
            Some(name) => self.context(&name),
            None => self.context(DEFAULT_CONTEXT),
        }
    }

    /// Names of all contexts present on disk, sorted
    pub async fn list_contexts(&self) -> Result<Vec<String>> {
        let dir = self.root.join("contexts");
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Resolved directory tree of one context
#[derive(Debug, Clone)]
pub struct ContextPaths {
    name: String,
    root: PathBuf,
}

impl ContextPaths {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join validated segments under the context root
    pub fn resolve(&self, segments: &[&str]) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(check_segment(segment)?);
        }
        Ok(path)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn targets_file(&self) -> PathBuf {
        self.root.join("targets").join("targets.json")
    }

    pub fn agents_file(&self) -> PathBuf {
        self.root.join("agents").join("agents.json")
    }

    pub fn agent_locks_dir(&self) -> PathBuf {
        self.root.join("agents").join("locks")
    }

    pub fn agent_lock_file(&self, agent: &str) -> Result<PathBuf> {
        let agent = check_segment(agent)?;
        Ok(self.agent_locks_dir().join(format!("{}.lock.json", agent)))
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.root.join("alerts")
    }

    pub fn telegram_config_file(&self) -> PathBuf {
        self.alerts_dir().join("telegram.json")
    }

    pub fn alert_policy_file(&self) -> PathBuf {
        self.alerts_dir().join("policy.json")
    }

    pub fn addons_file(&self) -> PathBuf {
        self.root.join("addons").join("addons.json")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn releases_dir(&self, app: &str) -> Result<PathBuf> {
        self.resolve(&["releases", app])
    }

    pub fn release_dir(&self, app: &str, release_id: &str) -> Result<PathBuf> {
        self.resolve(&["releases", app, release_id])
    }

    /// Create the full directory tree with mode `0700`
    pub async fn ensure(&self) -> Result<()> {
        for dir in [
            self.root.join("targets"),
            self.agent_locks_dir(),
            self.alerts_dir(),
            self.events_dir(),
            self.root.join("releases"),
        ] {
            fsio::ensure_dir(&dir).await?;
        }
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    pub async fn load_config(&self) -> Result<Option<ContextConfig>> {
        fsio::read_json(&self.config_file()).await
    }

    /// Create the tree and write `config.json`, keeping an existing `created_at`
    pub async fn init(&self, vault_file: Option<String>) -> Result<ContextConfig> {
        self.ensure().await?;
        let now = Utc::now();
        let config = match self.load_config().await? {
            Some(mut existing) => {
                if vault_file.is_some() {
                    existing.vault_file = vault_file;
                }
                existing.updated_at = now;
                existing
            }
            None => ContextConfig {
                name: self.name.clone(),
                context_type: "internal-dogfood".to_string(),
                vault_file,
                created_at: now,
                updated_at: now,
            },
        };
        fsio::write_json_pretty(&self.config_file(), &config).await?;
        Ok(config)
    }
}

/// Per-context settings stored in `config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub context_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
