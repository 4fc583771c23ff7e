//! Addon store: compose fragments registered per app
//!
//! Records live in `addons/addons.json`; fragment sources are copied into
//! `addons/<app>/<name>.yaml` so a registered addon does not depend on the
//! operator's working tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use paas_core::fsio::{self, StoreLock};
use paas_core::layout::ContextPaths;
use paas_core::types::validate_slug;
use paas_core::{PaasError, Result};

use crate::resolver::collect_section_keys;

pub const MERGE_STRATEGY: &str = "additive-no-override";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonRecord {
    pub app: String,
    pub name: String,
    #[serde(default)]
    pub pack: String,
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: String,
    pub fragment_path: String,
    pub updated_at: DateTime<Utc>,
}

fn default_merge_strategy() -> String {
    MERGE_STRATEGY.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AddonFile {
    #[serde(default)]
    apps: BTreeMap<String, Vec<AddonRecord>>,
}

#[derive(Debug, Clone)]
pub struct NewAddon {
    pub app: String,
    pub name: String,
    pub pack: String,
    pub fragment: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AddonStore {
    path: PathBuf,
    root: PathBuf,
}

impl AddonStore {
    pub fn new(ctx: &ContextPaths) -> Self {
        let path = ctx.addons_file();
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.root().join("addons"));
        Self { path, root }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_file(&self) -> Result<AddonFile> {
        Ok(fsio::read_json(&self.path).await?.unwrap_or_default())
    }

    /// Addons of `app`, sorted by lower-cased name
    pub async fn list(&self, app: &str) -> Result<Vec<AddonRecord>> {
        let app = validate_slug("app", app)?;
        let mut rows = self
            .load_file()
            .await?
            .apps
            .remove(&app)
            .unwrap_or_default();
        rows.sort_by_key(|r| r.name.to_lowercase());
        Ok(rows)
    }

    /// Register (or replace) an addon, copying its fragment into the store
    pub async fn add(&self, new: NewAddon) -> Result<AddonRecord> {
        let app = validate_slug("app", &new.app)?;
        let name = validate_slug("addon", &new.name)?;

        let content = tokio::fs::read_to_string(&new.fragment)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    PaasError::not_found(format!("addon fragment {}", new.fragment.display()))
                }
                _ => PaasError::Io(e),
            })?;
        collect_section_keys(&content).map_err(|e| {
            PaasError::usage(format!("invalid addon fragment {:?}: {}", name, e))
        })?;

        let _lock = StoreLock::acquire(&self.path).await?;
        let fragment_path = self.root.join(&app).join(format!("{}.yaml", name));
        fsio::write_atomic(&fragment_path, content.as_bytes()).await?;

        let record = AddonRecord {
            app: app.clone(),
            name: name.clone(),
            pack: new.pack.trim().to_string(),
            merge_strategy: MERGE_STRATEGY.to_string(),
            fragment_path: fragment_path.display().to_string(),
            updated_at: Utc::now(),
        };

        let mut file = self.load_file().await?;
        let rows = file.apps.entry(app.clone()).or_default();
        match rows.iter_mut().find(|r| r.name.eq_ignore_ascii_case(&name)) {
            Some(existing) => *existing = record.clone(),
            None => rows.push(record.clone()),
        }
        fsio::write_json_pretty(&self.path, &file).await?;

        info!("Registered addon {} for app {}", name, app);
        Ok(record)
    }

    pub async fn remove(&self, app: &str, name: &str) -> Result<AddonRecord> {
        let app = validate_slug("app", app)?;
        let name = validate_slug("addon", name)?;

        let _lock = StoreLock::acquire(&self.path).await?;
        let mut file = self.load_file().await?;
        let rows = file.apps.entry(app.clone()).or_default();
        let idx = rows
            .iter()
            .position(|r| r.name.eq_ignore_ascii_case(&name))
            .ok_or_else(|| PaasError::not_found(format!("addon {:?} for app {:?}", name, app)))?;
        let removed = rows.remove(idx);
        if rows.is_empty() {
            file.apps.remove(&app);
        }
        fsio::write_json_pretty(&self.path, &file).await?;

        match tokio::fs::remove_file(&removed.fragment_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::{ErrorKind, StateRoot};
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> AddonStore {
        AddonStore::new(&StateRoot::new(temp_dir.path().join("state")).context("default").unwrap())
    }

    fn fragment(temp_dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = temp_dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        for name in ["redis", "Metrics"] {
            store
                .add(NewAddon {
                    app: "billing-api".into(),
                    name: name.into(),
                    pack: "cache".into(),
                    fragment: fragment(&temp_dir, "frag.yaml", "services:\n  sidecar: {}\n"),
                })
                .await
                .unwrap();
        }

        let rows = store.list("billing-api").await.unwrap();
        assert_eq!(
            rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["Metrics", "redis"]
        );
        assert_eq!(rows[0].merge_strategy, MERGE_STRATEGY);
        assert!(Path::new(&rows[1].fragment_path).exists());

        let removed = store.remove("billing-api", "redis").await.unwrap();
        assert!(!Path::new(&removed.fragment_path).exists());
        assert_eq!(store.list("billing-api").await.unwrap().len(), 1);

        let err = store.remove("billing-api", "redis").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_fragment() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let err = store
            .add(NewAddon {
                app: "billing-api".into(),
                name: "bad".into(),
                pack: String::new(),
                fragment: fragment(&temp_dir, "bad.yaml", "services: [a, b]\n"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageError);
        assert!(store.list("billing-api").await.unwrap().is_empty());
    }
}
