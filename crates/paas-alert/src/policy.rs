//! Severity to channel routing: `alerts/policy.json`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::{PaasError, Result, Severity};

/// Where an alert of a given severity goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Log,
    Disabled,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Telegram, Channel::Log, Channel::Disabled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Log => "log",
            Channel::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PaasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Channel::Telegram),
            "log" => Ok(Channel::Log),
            "disabled" | "off" => Ok(Channel::Disabled),
            _ => Err(PaasError::usage(format!(
                "invalid alert channel {:?} (expected telegram|log|disabled)",
                s.trim()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub default_channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<Channel>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            default_channel: Channel::Log,
            info: Some(Channel::Log),
            warning: Some(Channel::Telegram),
            critical: Some(Channel::Telegram),
        }
    }
}

impl AlertPolicy {
    /// Severity override, else the default channel
    pub fn channel_for(&self, severity: Severity) -> Channel {
        let mapped = match severity {
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Critical => self.critical,
        };
        mapped.unwrap_or(self.default_channel)
    }
}

/// Partial update for [`PolicyStore::update`]; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub default_channel: Option<Channel>,
    pub info: Option<Channel>,
    pub warning: Option<Channel>,
    pub critical: Option<Channel>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        self.default_channel.is_none()
            && self.info.is_none()
            && self.warning.is_none()
            && self.critical.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub severity: Severity,
    pub channel: Channel,
    pub policy_path: PathBuf,
}

pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            path: ctx.alert_policy_file(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Stored policy, or the default when none was saved
    pub async fn load(&self) -> Result<AlertPolicy> {
        let policy: Option<AlertPolicy> = fsio::read_json(&self.path)
            .await
            .map_err(|e| PaasError::internal(format!("invalid alert policy: {}", e)))?;
        Ok(policy.unwrap_or_default())
    }

    pub async fn update(&self, update: PolicyUpdate) -> Result<AlertPolicy> {
        let mut policy = self.load().await?;
        if let Some(channel) = update.default_channel {
            policy.default_channel = channel;
        }
        if update.info.is_some() {
            policy.info = update.info;
        }
        if update.warning.is_some() {
            policy.warning = update.warning;
        }
        if update.critical.is_some() {
            policy.critical = update.critical;
        }
        fsio::write_json_pretty(&self.path, &policy).await?;
        Ok(policy)
    }

    pub async fn route(&self, severity: Severity) -> Result<Route> {
        let policy = self.load().await?;
        Ok(Route {
            severity,
            channel: policy.channel_for(severity),
            policy_path: self.path.clone(),
        })
    }
}
