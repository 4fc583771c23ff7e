//! Vault trust store: pinned recipient fingerprints per `(repo_root, file)`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use paas_core::fsio;
use paas_core::{PaasError, Result};

/// Environment variable overriding the trust store location
pub const TRUST_STORE_ENV: &str = "SI_VAULT_TRUST_STORE";

const SCHEMA_VERSION: u32 = 3;

/// `<home>/.si/vault/trust.json`
pub fn default_trust_store_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaasError::internal("unable to determine home directory"))?;
    Ok(home.join(".si").join("vault").join("trust.json"))
}

/// Stable hash of a recipient set: sha256 over sorted, de-duplicated keys
pub fn recipients_fingerprint(recipients: &[String]) -> String {
    let unique: BTreeSet<&str> = recipients
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect();
    let mut hasher = Sha256::new();
    for recipient in unique {
        hasher.update(recipient.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustEntry {
    pub repo_root: String,
    pub file: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustStore {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<TrustEntry>,
}

impl Default for TrustStore {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

fn clean(path: &str) -> PathBuf {
    Path::new(path.trim()).components().collect()
}

impl TrustStore {
    /// Missing file loads as an empty store
    pub async fn load(path: &Path) -> Result<Self> {
        let mut store: TrustStore = fsio::read_json(path).await?.unwrap_or_default();
        if store.schema_version < SCHEMA_VERSION {
            store.schema_version = SCHEMA_VERSION;
        }
        Ok(store)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        fsio::write_json_pretty(path, self).await
    }

    pub fn find(&self, repo_root: &Path, file: &Path) -> Option<&TrustEntry> {
        let repo_root: PathBuf = repo_root.components().collect();
        let file: PathBuf = file.components().collect();
        self.entries
            .iter()
            .find(|e| clean(&e.repo_root) == repo_root && clean(&e.file) == file)
    }

    pub fn upsert(&mut self, repo_root: &Path, file: &Path, fingerprint: &str) -> &TrustEntry {
        let repo_root: PathBuf = repo_root.components().collect();
        let file: PathBuf = file.components().collect();
        let entry = TrustEntry {
            repo_root: repo_root.display().to_string(),
            file: file.display().to_string(),
            fingerprint: fingerprint.trim().to_string(),
            trusted_at: Some(paas_core::types::rfc3339_nanos(&Utc::now())),
        };

        let idx = match self
            .entries
            .iter()
            .position(|e| clean(&e.repo_root) == repo_root && clean(&e.file) == file)
        {
            Some(idx) => {
                self.entries[idx] = entry;
                idx
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        &self.entries[idx]
    }
}
