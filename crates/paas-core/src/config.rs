//! Configuration management for the paas state root
//!
//! Loaded from `<state_root>/config.toml`. Every field has a default so an
//! absent or partial file is valid.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{PaasError, Result};

/// State-root level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaasConfig {
    /// Remote directory that receives release bundles
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Substrings that mark a compose environment key as sensitive
    #[serde(default = "default_sensitive_key_markers")]
    pub sensitive_key_markers: Vec<String>,

    /// Timeouts for subprocess and network calls
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Incident queue tuning
    #[serde(default)]
    pub incident: IncidentConfig,

    /// Base URL of the Telegram Bot API
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_scp_upload_secs")]
    pub scp_upload_secs: u64,

    #[serde(default = "default_compose_secs")]
    pub compose_apply_secs: u64,

    #[serde(default = "default_compose_secs")]
    pub compose_pull_secs: u64,

    #[serde(default = "default_notifier_secs")]
    pub notifier_secs: u64,

    #[serde(default = "default_agent_exec_secs")]
    pub agent_exec_secs: u64,
}

/// Incident collection and queue retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    #[serde(default = "default_collect_limit")]
    pub collect_limit: usize,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

// Default value providers
fn default_remote_root() -> String {
    "/opt/paas/releases".to_string()
}

fn default_sensitive_key_markers() -> Vec<String> {
    vec![
        "PASSWORD".to_string(),
        "SECRET".to_string(),
        "TOKEN".to_string(),
        "KEY".to_string(),
    ]
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_scp_upload_secs() -> u64 {
    30
}

fn default_compose_secs() -> u64 {
    600
}

fn default_notifier_secs() -> u64 {
    15
}

fn default_agent_exec_secs() -> u64 {
    15
}

fn default_window_secs() -> i64 {
    300
}

fn default_collect_limit() -> usize {
    200
}

fn default_max_entries() -> usize {
    1000
}

fn default_max_age_hours() -> i64 {
    14 * 24
}

impl PaasConfig {
    /// Load configuration from `<state_root>/config.toml` or use defaults
    pub fn load_or_default(state_root: &Path) -> Result<Self> {
        let config_path = state_root.join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content).map_err(|e| {
                PaasError::usage(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration unless a config file already exists
    pub fn write_default(state_root: &Path) -> Result<bool> {
        let config_path = state_root.join("config.toml");
        if config_path.exists() {
            return Ok(false);
        }
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| PaasError::internal(format!("failed to serialize config: {}", e)))?;
        crate::fsio::write_atomic_sync(&config_path, content.as_bytes())?;
        Ok(true)
    }
}

impl TimeoutConfig {
    pub fn scp_upload(&self) -> Duration {
        Duration::from_secs(self.scp_upload_secs)
    }

    pub fn compose_apply(&self) -> Duration {
        Duration::from_secs(self.compose_apply_secs)
    }

    pub fn compose_pull(&self) -> Duration {
        Duration::from_secs(self.compose_pull_secs)
    }

    pub fn notifier(&self) -> Duration {
        Duration::from_secs(self.notifier_secs)
    }

    pub fn agent_exec(&self) -> Duration {
        Duration::from_secs(self.agent_exec_secs)
    }
}

impl IncidentConfig {
    pub fn window(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.window_secs).unwrap_or_else(|| TimeDelta::minutes(5))
    }

    pub fn max_age(&self) -> TimeDelta {
        TimeDelta::try_hours(self.max_age_hours).unwrap_or_else(|| TimeDelta::days(14))
    }
}

impl Default for PaasConfig {
    fn default() -> Self {
        Self {
            remote_root: default_remote_root(),
            sensitive_key_markers: default_sensitive_key_markers(),
            timeouts: TimeoutConfig::default(),
            incident: IncidentConfig::default(),
            telegram_api_base: default_telegram_api_base(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scp_upload_secs: default_scp_upload_secs(),
            compose_apply_secs: default_compose_secs(),
            compose_pull_secs: default_compose_secs(),
            notifier_secs: default_notifier_secs(),
            agent_exec_secs: default_agent_exec_secs(),
        }
    }
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            collect_limit: default_collect_limit(),
            max_entries: default_max_entries(),
            max_age_hours: default_max_age_hours(),
        }
    }
}
