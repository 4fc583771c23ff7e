//! Agent configuration store: `agents/agents.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use paas_core::fsio::{self, StoreLock};
use paas_core::layout::ContextPaths;
use paas_core::types::validate_slug;
use paas_core::{PaasError, Result};

/// Target selector meaning every target of the context
pub const ALL_TARGETS: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AgentDocument {
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

/// Input for [`AgentStore::enable`]
#[derive(Debug, Clone, Default)]
pub struct EnableAgent {
    pub name: String,
    /// `all` or target names; comma lists are split
    pub targets: Vec<String>,
    pub profile: Option<String>,
}

fn normalize_targets(targets: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in targets.iter().flat_map(|t| t.split(',')).map(str::trim) {
        if name.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case(ALL_TARGETS) {
            return vec![ALL_TARGETS.to_string()];
        }
        if !out.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    if out.is_empty() {
        out.push(ALL_TARGETS.to_string());
    }
    out
}

pub struct AgentStore {
    path: PathBuf,
}

impl AgentStore {
    pub fn new(ctx: &ContextPaths) -> Self {
        Self {
            path: ctx.agents_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All agents, sorted by lower-cased name
    pub async fn list(&self) -> Result<Vec<AgentConfig>> {
        let doc: AgentDocument = fsio::read_json(&self.path)
            .await
            .map_err(|e| PaasError::internal(format!("invalid agent store: {}", e)))?
            .unwrap_or_default();
        let mut agents = doc.agents;
        agents.sort_by_key(|a| a.name.to_lowercase());
        Ok(agents)
    }

    async fn save(&self, agents: Vec<AgentConfig>) -> Result<()> {
        let mut agents = agents;
        agents.sort_by_key(|a| a.name.to_lowercase());
        fsio::write_json_pretty(&self.path, &AgentDocument { agents }).await
    }

    pub async fn find(&self, name: &str) -> Result<Option<AgentConfig>> {
        let needle = name.trim();
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(needle)))
    }

    pub async fn get(&self, name: &str) -> Result<AgentConfig> {
        self.find(name)
            .await?
            .ok_or_else(|| PaasError::not_found(format!("agent {:?}", name.trim())))
    }

    /// Create or re-enable an agent, replacing its targets and profile
    pub async fn enable(&self, req: EnableAgent) -> Result<AgentConfig> {
        let name = validate_slug("agent", &req.name)?;
        let targets = normalize_targets(&req.targets);
        let profile = req
            .profile
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let _lock = StoreLock::acquire(&self.path).await?;
        let mut agents = self.list().await?;
        let now = Utc::now();
        let agent = match agents
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => {
                existing.enabled = true;
                existing.targets = targets;
                existing.profile = profile;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let agent = AgentConfig {
                    name: name.clone(),
                    enabled: true,
                    targets,
                    profile,
                    created_at: now,
                    updated_at: now,
                    last_run_at: None,
                    last_run_id: None,
                    last_run_state: None,
                };
                agents.push(agent.clone());
                agent
            }
        };
        self.save(agents).await?;
        info!("Enabled agent {}", agent.name);
        Ok(agent)
    }

    pub async fn disable(&self, name: &str) -> Result<AgentConfig> {
        self.update(name, |agent| {
            agent.enabled = false;
            agent.updated_at = Utc::now();
        })
        .await
    }

    /// Stamp the outcome of a run onto the agent
    pub async fn record_run(
        &self,
        name: &str,
        run_id: &str,
        state: &str,
        at: DateTime<Utc>,
    ) -> Result<AgentConfig> {
        self.update(name, |agent| {
            agent.last_run_at = Some(at);
            agent.last_run_id = Some(run_id.to_string());
            agent.last_run_state = Some(state.to_string());
            agent.updated_at = at;
        })
        .await
    }

    async fn update<F>(&self, name: &str, apply: F) -> Result<AgentConfig>
    where
        F: FnOnce(&mut AgentConfig),
    {
        let _lock = StoreLock::acquire(&self.path).await?;
        let mut agents = self.list().await?;
        let agent = agents
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| PaasError::not_found(format!("agent {:?}", name.trim())))?;
        apply(agent);
        let updated = agent.clone();
        self.save(agents).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::{ErrorKind, StateRoot};
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> AgentStore {
        let ctx = StateRoot::new(temp_dir.path()).context("default").unwrap();
        AgentStore::new(&ctx)
    }

    #[test]
    fn test_normalize_targets() {
        assert_eq!(normalize_targets(&[]), vec!["all"]);
        assert_eq!(
            normalize_targets(&["edge-a, edge-b".into(), "EDGE-A".into()]),
            vec!["edge-a", "edge-b"]
        );
        assert_eq!(normalize_targets(&["edge-a,ALL".into()]), vec!["all"]);
    }

    #[tokio::test]
    async fn test_enable_disable_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let agent = store
            .enable(EnableAgent {
                name: "ops-agent".into(),
                targets: vec![],
                profile: Some(" work ".into()),
            })
            .await
            .unwrap();
        assert!(agent.enabled);
        assert_eq!(agent.targets, vec!["all"]);
        assert_eq!(agent.profile.as_deref(), Some("work"));

        let disabled = store.disable("OPS-AGENT").await.unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.created_at, agent.created_at);

        let again = store
            .enable(EnableAgent {
                name: "ops-agent".into(),
                targets: vec!["edge-a".into()],
                profile: None,
            })
            .await
            .unwrap();
        assert!(again.enabled);
        assert_eq!(again.targets, vec!["edge-a"]);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_agent_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = store(&temp_dir).disable("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_record_run_stamps_agent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store
            .enable(EnableAgent {
                name: "ops-agent".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let at = Utc::now();
        let agent = store
            .record_run("ops-agent", "run-1", "noop", at)
            .await
            .unwrap();
        assert_eq!(agent.last_run_at, Some(at));
        assert_eq!(agent.last_run_state.as_deref(), Some("noop"));
    }
}
