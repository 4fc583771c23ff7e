//! Runtime plan: which codex profile, auth cache and prompt a run would use

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use paas_core::{PaasError, Result};
use paas_events::QueueEntry;

/// Environment variable overriding the codex profiles directory
pub const PROFILES_ROOT_ENV: &str = "PAAS_CODEX_PROFILES_ROOT";

pub const MODE_CODEX_PROFILE_AUTH: &str = "codex-profile-auth";

const AUTH_FILE: &str = "auth.json";
const PROFILE_FILE: &str = "profile.json";

/// `<home>/.si/codex/profiles`
pub fn default_profiles_root() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaasError::internal("unable to determine home directory"))?;
    Ok(home.join(".si").join("codex").join("profiles"))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CodexProfile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub exists: bool,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Codex profiles, one directory per profile id
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    root: PathBuf,
}

impl ProfileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Profiles sorted by id; a missing root has none
    pub async fn list(&self) -> Result<Vec<CodexProfile>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().to_string();
            if id.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            profiles.push(self.load(&id, entry.path()).await);
        }
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(profiles)
    }

    async fn load(&self, id: &str, dir: PathBuf) -> CodexProfile {
        let meta: ProfileFile = paas_core::fsio::read_json(&dir.join(PROFILE_FILE))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        CodexProfile {
            id: id.to_string(),
            email: meta.email.filter(|e| !e.trim().is_empty()),
            dir,
        }
    }

    pub async fn require(&self, id: &str) -> Result<CodexProfile> {
        let id = paas_core::layout::check_segment(id)?;
        self.list()
            .await?
            .into_iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| PaasError::not_found(format!("codex profile {:?}", id)))
    }

    pub async fn auth_status(&self, profile: &CodexProfile) -> AuthStatus {
        let path = profile.dir.join(AUTH_FILE);
        let reason = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => None,
            Ok(_) => Some(format!("codex auth cache is empty: {}", path.display())),
            Err(_) => Some(format!(
                "codex auth cache not found for profile {}: {}",
                profile.id,
                path.display()
            )),
        };
        AuthStatus {
            exists: reason.is_none(),
            path,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimePlan {
    pub mode: String,
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_email: Option<String>,
    pub auth_path: PathBuf,
    pub prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub incident_id: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Incident id, falling back to the queue key
pub fn incident_ref(entry: Option<&QueueEntry>) -> String {
    match entry {
        None => String::new(),
        Some(entry) if !entry.incident.id.trim().is_empty() => entry.incident.id.trim().to_string(),
        Some(entry) => entry.key.trim().to_string(),
    }
}

pub fn incident_prompt(agent: &str, entry: Option<&QueueEntry>) -> String {
    let agent = match agent.trim() {
        "" => "paas-agent",
        name => name,
    };
    let Some(incident) = entry else {
        return format!(
            "{}: no active incident selected; validate queue state and emit noop result",
            agent
        );
    };
    let message = match incident.incident.message.trim() {
        "" => "incident detected",
        m => m,
    };
    let target = match incident.incident.target.trim() {
        "" => "unknown-target",
        t => t,
    };
    format!(
        "{}: analyze incident {} for target {} and propose safe remediation steps: {}",
        agent,
        incident_ref(entry),
        target,
        message
    )
}

/// Resolve the profile (the agent's, else the first one) and check its auth
///
/// Missing auth yields a plan with `ready=false`; having no profile at all is
/// an error.
pub async fn build_plan(
    catalog: &ProfileCatalog,
    agent: &str,
    profile: Option<&str>,
    entry: Option<&QueueEntry>,
) -> Result<RuntimePlan> {
    let profile = match profile.map(str::trim).filter(|p| !p.is_empty()) {
        Some(id) => catalog.require(id).await?,
        None => catalog.list().await?.into_iter().next().ok_or_else(|| {
            PaasError::usage("no codex profiles configured for agent runtime adapter")
        })?,
    };
    let auth = catalog.auth_status(&profile).await;

    Ok(RuntimePlan {
        mode: MODE_CODEX_PROFILE_AUTH.to_string(),
        profile_id: profile.id.clone(),
        profile_email: profile.email.clone(),
        auth_path: auth.path,
        prompt: incident_prompt(agent, entry),
        incident_id: incident_ref(entry),
        ready: auth.exists,
        reason: auth.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_profile(root: &Path, id: &str, auth: bool) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PROFILE_FILE), r#"{"email":"ops@example.com"}"#).unwrap();
        if auth {
            std::fs::write(dir.join(AUTH_FILE), r#"{"token":"x"}"#).unwrap();
        }
    }

    #[test]
    fn test_prompt_without_incident() {
        assert_eq!(
            incident_prompt("ops-agent", None),
            "ops-agent: no active incident selected; validate queue state and emit noop result"
        );
        assert!(incident_prompt(" ", None).starts_with("paas-agent:"));
    }

    #[tokio::test]
    async fn test_first_profile_is_default() {
        let temp_dir = TempDir::new().unwrap();
        seed_profile(temp_dir.path(), "work", true);
        seed_profile(temp_dir.path(), "alt", false);

        let catalog = ProfileCatalog::new(temp_dir.path());
        let plan = build_plan(&catalog, "ops-agent", None, None).await.unwrap();
        assert_eq!(plan.profile_id, "alt");
        assert!(!plan.ready);
        assert!(plan.reason.unwrap().contains("auth cache not found"));

        let plan = build_plan(&catalog, "ops-agent", Some("work"), None)
            .await
            .unwrap();
        assert!(plan.ready);
        assert_eq!(plan.mode, MODE_CODEX_PROFILE_AUTH);
        assert_eq!(plan.profile_email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_no_profiles_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = ProfileCatalog::new(temp_dir.path().join("missing"));
        let err = build_plan(&catalog, "ops-agent", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no codex profiles"));

        let err = build_plan(&catalog, "ops-agent", Some("ghost"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), paas_core::ErrorKind::NotFound);
    }
}
