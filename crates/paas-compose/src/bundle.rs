//! Immutable release bundles under `releases/<app>/<release_id>/`
//!
//! A bundle is assembled in a hidden sibling directory and renamed into place
//! once `metadata.json` is written, so a visible release directory is always
//! complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::types::compact_timestamp;
use paas_core::{PaasError, Result};

use crate::resolver::{sha256_hex, PreparedCompose, BASE_COMPOSE};
use crate::runtime_env::{materialize_artifacts, materialize_runtime_env, EnvScope};

pub const METADATA_FILE: &str = "metadata.json";

const SCHEMA_VERSION: u32 = 1;

/// `rel-<YYYYMMDDTHHMMSS><nanos>Z-<6 hex>`; sorts by creation time
pub fn new_release_id(now: DateTime<Utc>) -> String {
    let tail = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "rel-{}{:09}Z-{}",
        compact_timestamp(&now),
        now.timestamp_subsec_nanos(),
        &tail[..6]
    )
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseMetadata {
    pub schema_version: u32,
    pub app: String,
    pub release_id: String,
    pub context: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub compose_file: String,
    pub compose_sha256: String,
    pub bundle_sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub compose_files: Vec<String>,
    #[serde(default)]
    pub addon_count: usize,
    #[serde(default)]
    pub runtime_env_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub guardrails: BTreeMap<String, String>,
}

/// A bundle on disk
#[derive(Debug, Clone)]
pub struct BundleRef {
    pub dir: PathBuf,
    pub metadata: ReleaseMetadata,
}

impl BundleRef {
    pub fn release_id(&self) -> &str {
        &self.metadata.release_id
    }
}

/// sha256 over the sorted `name\0sha256(content)\n` lines of every bundle
/// file except `metadata.json`
pub async fn bundle_sha256(dir: &Path) -> Result<String> {
    let mut digests = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == METADATA_FILE {
            continue;
        }
        let bytes = tokio::fs::read(entry.path()).await?;
        digests.insert(name, sha256_hex(&bytes));
    }

    let mut hasher = Sha256::new();
    for (name, digest) in &digests {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write a new release bundle for `prepared`
///
/// `env` holds `KEY=VALUE` pairs offered to the runtime `.env`; `guardrails`
/// is recorded verbatim in the metadata.
#[instrument(skip(ctx, prepared, env, guardrails), fields(app = %prepared.app, release = %prepared.release_id))]
pub async fn write_bundle(
    ctx: &ContextPaths,
    prepared: &PreparedCompose,
    env: &[String],
    guardrails: BTreeMap<String, String>,
) -> Result<BundleRef> {
    let releases = ctx.releases_dir(&prepared.app)?;
    let final_dir = ctx.release_dir(&prepared.app, &prepared.release_id)?;
    if tokio::fs::try_exists(&final_dir).await? {
        return Err(PaasError::AlreadyExists(format!(
            "release {}/{}",
            prepared.app, prepared.release_id
        )));
    }

    fsio::ensure_dir(&releases).await?;
    let staging = releases.join(format!(
        ".{}.tmp-{}",
        prepared.release_id,
        uuid::Uuid::new_v4().simple()
    ));
    fsio::ensure_dir(&staging).await?;

    let result = assemble(&staging, prepared, env, guardrails).await;
    let metadata = match result {
        Ok(metadata) => metadata,
        Err(e) => {
            discard(&staging).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&staging, &final_dir).await {
        discard(&staging).await;
        return Err(e.into());
    }

    info!(
        "Wrote release bundle {} ({} files)",
        final_dir.display(),
        metadata.compose_files.len() + 2
    );
    Ok(BundleRef {
        dir: final_dir,
        metadata,
    })
}

async fn assemble(
    dir: &Path,
    prepared: &PreparedCompose,
    env: &[String],
    guardrails: BTreeMap<String, String>,
) -> Result<ReleaseMetadata> {
    fsio::write_atomic(&dir.join(BASE_COMPOSE), prepared.resolved_compose.as_bytes()).await?;
    let compose_files = materialize_artifacts(dir, prepared).await?;
    let scope = EnvScope::new(&prepared.context, &prepared.app, &prepared.targets);
    let runtime_env_keys = materialize_runtime_env(dir, &compose_files, env, &scope).await?;

    let metadata = ReleaseMetadata {
        schema_version: SCHEMA_VERSION,
        app: prepared.app.clone(),
        release_id: prepared.release_id.clone(),
        context: prepared.context.clone(),
        strategy: prepared.strategy.clone(),
        targets: prepared.targets.clone(),
        compose_file: prepared.source_file.display().to_string(),
        compose_sha256: prepared.compose_sha256.clone(),
        bundle_sha256: bundle_sha256(dir).await?,
        created_at: Utc::now(),
        compose_files,
        addon_count: prepared.addons.len(),
        runtime_env_keys,
        guardrails,
    };
    fsio::write_json_pretty(&dir.join(METADATA_FILE), &metadata).await?;
    Ok(metadata)
}

async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!("Failed to remove staging dir {:?}: {}", dir, e);
    }
}

/// Load a bundle and verify both of its content hashes
pub async fn load_bundle(ctx: &ContextPaths, app: &str, release_id: &str) -> Result<BundleRef> {
    let dir = ctx.release_dir(app, release_id)?;
    let metadata: ReleaseMetadata = fsio::read_json(&dir.join(METADATA_FILE))
        .await?
        .ok_or_else(|| PaasError::not_found(format!("release {}/{}", app, release_id)))?;

    let compose = tokio::fs::read(dir.join(BASE_COMPOSE))
        .await
        .map_err(|e| PaasError::BundleCorrupt(format!("{}: {}", dir.display(), e)))?;
    if sha256_hex(&compose) != metadata.compose_sha256 {
        return Err(PaasError::BundleCorrupt(format!(
            "compose_sha256 mismatch in {}",
            dir.display()
        )));
    }
    if bundle_sha256(&dir).await? != metadata.bundle_sha256 {
        return Err(PaasError::BundleCorrupt(format!(
            "bundle_sha256 mismatch in {}",
            dir.display()
        )));
    }
    Ok(BundleRef { dir, metadata })
}

/// Releases of `app`, newest first; directories without metadata are skipped
pub async fn list_releases(ctx: &ContextPaths, app: &str) -> Result<Vec<BundleRef>> {
    let root = ctx.releases_dir(app)?;
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut releases = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.file_type().await?.is_dir() {
            continue;
        }
        let dir = entry.path();
        match fsio::read_json::<ReleaseMetadata>(&dir.join(METADATA_FILE)).await {
            Ok(Some(metadata)) => releases.push(BundleRef { dir, metadata }),
            Ok(None) => continue,
            Err(e) => warn!("Skipping release {:?}: {}", dir, e),
        }
    }
    releases.sort_by(|a, b| {
        b.metadata
            .created_at
            .cmp(&a.metadata.created_at)
            .then_with(|| b.metadata.release_id.cmp(&a.metadata.release_id))
    });
    Ok(releases)
}

/// Apps that have a releases directory
pub async fn list_apps(ctx: &ContextPaths) -> Result<Vec<String>> {
    let root = ctx.root().join("releases");
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut apps = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            apps.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    apps.sort();
    Ok(apps)
}
