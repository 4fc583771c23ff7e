//! Target store: registry of deploy hosts with one current selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::fsio::{self, StoreLock};
use crate::layout::ContextPaths;
use crate::types::validate_slug;
use crate::{PaasError, Result};

/// SSH authentication method recorded for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Key,
    Password,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Key => write!(f, "key"),
            AuthMethod::Password => write!(f, "password"),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "key" => Ok(AuthMethod::Key),
            "password" => Ok(AuthMethod::Password),
            _ => Err(format!("Invalid auth method: {} (expected key|password)", s)),
        }
    }
}

/// How ingress traffic reaches the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressLbMode {
    Dns,
    L4,
}

impl FromStr for IngressLbMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "dns" => Ok(IngressLbMode::Dns),
            "l4" | "lb" | "loadbalancer" | "load-balancer" => Ok(IngressLbMode::L4),
            _ => Err(format!("Invalid ingress lb mode: {} (expected dns|l4)", s)),
        }
    }
}

/// A deploy host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_lb_mode: Option<IngressLbMode>,
}

/// Input for [`TargetStore::add`]
#[derive(Debug, Clone, Default)]
pub struct NewTarget {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub auth_method: AuthMethod,
    pub labels: Vec<String>,
    pub make_current: bool,
    pub ingress_provider: Option<String>,
    pub ingress_domain: Option<String>,
    pub ingress_lb_mode: Option<IngressLbMode>,
}

/// On-disk document: `targets/targets.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_target: Option<String>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl TargetSet {
    pub fn find(&self, name: &str) -> Option<&Target> {
        let name = name.trim();
        self.targets.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current_target
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }

    pub fn current(&self) -> Option<&Target> {
        self.current_target.as_deref().and_then(|c| self.find(c))
    }
}

/// Result of removing a target
#[derive(Debug, Clone)]
pub struct RemovedTarget {
    pub removed: Target,
    pub current_target: Option<String>,
}

/// Persistent target registry of one context
pub struct TargetStore {
    path: PathBuf,
}

impl TargetStore {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            path: ctx.targets_file(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn load(&self) -> Result<TargetSet> {
        Ok(fsio::read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, set: &TargetSet) -> Result<()> {
        fsio::write_json_pretty(&self.path, set).await
    }

    pub async fn add(&self, new: NewTarget) -> Result<Target> {
        let name = validate_slug("target", &new.name)?;
        let host = new.host.trim().to_string();
        if host.is_empty() {
            return Err(PaasError::usage("--host is required"));
        }
        let user = new.user.trim().to_string();
        if user.is_empty() {
            return Err(PaasError::usage("--user is required"));
        }
        let port = new.port.unwrap_or(22);
        if port == 0 {
            return Err(PaasError::usage("--port must be >= 1"));
        }
        let labels = normalize_labels(&new.labels)?;

        let _lock = StoreLock::acquire(&self.path).await?;
        let mut set = self.load().await?;
        if set.find(&name).is_some() {
            return Err(PaasError::AlreadyExists(format!("target {:?}", name)));
        }

        let now = Utc::now();
        let target = Target {
            name: name.clone(),
            host,
            port,
            user,
            auth_method: new.auth_method,
            labels,
            created_at: now,
            updated_at: now,
            ingress_provider: non_empty(new.ingress_provider),
            ingress_domain: non_empty(new.ingress_domain),
            ingress_lb_mode: new.ingress_lb_mode,
        };
        set.targets.push(target.clone());
        if new.make_current || set.current_target.is_none() {
            set.current_target = Some(name.clone());
        }
        self.save(&set).await?;

        info!("Added target {} ({}@{}:{})", name, target.user, target.host, target.port);
        Ok(target)
    }

    pub async fn use_target(&self, name: &str) -> Result<Target> {
        let _lock = StoreLock::acquire(&self.path).await?;
        let mut set = self.load().await?;
        let target = set
            .find(name)
            .cloned()
            .ok_or_else(|| PaasError::not_found(format!("target {:?}", name.trim())))?;
        set.current_target = Some(target.name.clone());
        self.save(&set).await?;
        Ok(target)
    }

    /// Remove a target; removing the current one requires `force`
    pub async fn remove(&self, name: &str, force: bool) -> Result<RemovedTarget> {
        let _lock = StoreLock::acquire(&self.path).await?;
        let mut set = self.load().await?;
        let idx = set
            .targets
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| PaasError::not_found(format!("target {:?}", name.trim())))?;

        let was_current = set.is_current(&set.targets[idx].name);
        if was_current && !force {
            return Err(PaasError::InUse(format!(
                "target {:?} is the current target",
                set.targets[idx].name
            )));
        }

        let removed = set.targets.remove(idx);
        if was_current {
            set.current_target = set.targets.first().map(|t| t.name.clone());
        }
        self.save(&set).await?;

        info!("Removed target {}", removed.name);
        Ok(RemovedTarget {
            removed,
            current_target: set.current_target,
        })
    }

    pub async fn get(&self, name: &str) -> Result<Target> {
        self.load()
            .await?
            .find(name)
            .cloned()
            .ok_or_else(|| PaasError::not_found(format!("target {:?}", name.trim())))
    }

    /// Resolve the targets a command applies to
    ///
    /// `all` selects every target; explicit names must exist; otherwise the
    /// current target is used.
    pub async fn resolve(&self, names: &[String], all: bool) -> Result<Vec<Target>> {
        let set = self.load().await?;
        if all {
            if set.targets.is_empty() {
                return Err(PaasError::usage("no targets configured; run `paas target add`"));
            }
            return Ok(set.targets.clone());
        }

        let names: Vec<&str> = names
            .iter()
            .flat_map(|n| n.split(','))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return set.current().cloned().map(|t| vec![t]).ok_or_else(|| {
                PaasError::usage("no current target; pass --target or run `paas target use`")
            });
        }

        let mut out: Vec<Target> = Vec::new();
        for name in names {
            let target = set
                .find(name)
                .ok_or_else(|| PaasError::not_found(format!("target {:?}", name)))?;
            if !out.iter().any(|t| t.name == target.name) {
                out.push(target.clone());
            }
        }
        Ok(out)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_labels(labels: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for label in labels.iter().flat_map(|l| l.split(',')) {
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        match label.split_once(':') {
            Some((k, _)) if !k.trim().is_empty() => out.push(label.to_string()),
            _ => {
                return Err(PaasError::usage(format!(
                    "invalid label {:?}: expected K:V",
                    label
                )))
            }
        }
    }
    Ok(out)
}
