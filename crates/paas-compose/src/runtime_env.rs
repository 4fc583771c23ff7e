//! Bundle artifacts derived from a prepared compose: addon files, the
//! `compose.files` manifest and the runtime `.env`

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use paas_core::fsio;
use paas_core::layout::check_segment;
use paas_core::types::env_key_segment;
use paas_core::{PaasError, Result};
use paas_vault::render_value_plain;

use crate::resolver::{PreparedCompose, BASE_COMPOSE};

pub const MANIFEST_FILE: &str = "compose.files";
pub const RUNTIME_ENV_FILE: &str = ".env";

fn interpolation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)[^}]*\}").expect("static interpolation regex")
    })
}

fn namespaced_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^PAAS__CTX_([A-Z0-9_]+?)(?:__NS_[A-Z0-9_]+?)?__APP_([A-Z0-9_]+?)__TARGET_([A-Z0-9_]+?)__VAR_([A-Z0-9_]+)$",
        )
        .expect("static namespaced key regex")
    })
}

/// Context, app and targets whose namespaced secret keys a bundle may project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvScope {
    context: String,
    app: String,
    targets: Vec<String>,
}

impl EnvScope {
    pub fn new<S: AsRef<str>>(context: &str, app: &str, targets: &[S]) -> Self {
        Self {
            context: env_key_segment(context),
            app: env_key_segment(app),
            targets: targets.iter().map(|t| env_key_segment(t.as_ref())).collect(),
        }
    }

    /// Position of the key's target in this scope, `None` when out of scope
    fn rank(&self, context: &str, app: &str, target: &str) -> Option<usize> {
        if context != self.context || app != self.app {
            return None;
        }
        self.targets.iter().position(|t| t == target)
    }
}

/// Namespaced secret key for one app variable on one target
///
/// `PAAS__CTX_<CTX>__NS_<NS>__APP_<APP>__TARGET_<TGT>__VAR_<NAME>`; without a
/// namespace the `NS` segment is left out.
pub fn secret_key_name(
    context: &str,
    namespace: Option<&str>,
    app: &str,
    target: &str,
    name: &str,
) -> String {
    let mut key = format!("PAAS__CTX_{}", env_key_segment(context));
    if let Some(ns) = namespace {
        key.push_str("__NS_");
        key.push_str(&env_key_segment(ns));
    }
    key.push_str(&format!(
        "__APP_{}__TARGET_{}__VAR_{}",
        env_key_segment(app),
        env_key_segment(target),
        env_key_segment(name)
    ));
    key
}

/// Base compose first, each name once, blanks dropped
pub fn normalize_manifest<S: AsRef<str>>(files: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = vec![BASE_COMPOSE.to_string()];
    seen.insert(BASE_COMPOSE.to_string());
    for file in files {
        let file = file.as_ref().trim();
        if file.is_empty() || file == "." {
            continue;
        }
        if seen.insert(file.to_string()) {
            out.push(file.to_string());
        }
    }
    out
}

pub async fn write_manifest(bundle_dir: &Path, files: &[String]) -> Result<Vec<String>> {
    let files = normalize_manifest(files);
    let mut body = files.join("\n");
    body.push('\n');
    fsio::write_atomic(&bundle_dir.join(MANIFEST_FILE), body.as_bytes()).await?;
    Ok(files)
}

/// Read `compose.files`; a missing manifest means just the base compose
pub async fn read_manifest(bundle_dir: &Path) -> Result<Vec<String>> {
    let path = bundle_dir.join(MANIFEST_FILE);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(vec![BASE_COMPOSE.to_string()])
        }
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry = check_segment(line).map_err(|_| {
            PaasError::BundleCorrupt(format!(
                "invalid compose file entry {:?} in {}",
                line,
                path.display()
            ))
        })?;
        entries.push(entry.to_string());
    }
    Ok(normalize_manifest(&entries))
}

/// Write addon fragments and the manifest into `bundle_dir`
pub async fn materialize_artifacts(bundle_dir: &Path, prepared: &PreparedCompose) -> Result<Vec<String>> {
    for artifact in &prepared.addons {
        let name = check_segment(&artifact.file_name)?;
        fsio::write_atomic(&bundle_dir.join(name), artifact.content.as_bytes()).await?;
    }
    write_manifest(bundle_dir, &prepared.compose_files).await
}

/// Union of `${NAME}` references across the listed compose files, sorted
pub async fn referenced_variables(bundle_dir: &Path, files: &[String]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for file in files {
        let file = check_segment(file)?;
        let raw = tokio::fs::read_to_string(bundle_dir.join(file)).await?;
        for caps in interpolation_re().captures_iter(&raw) {
            names.insert(caps[1].to_string());
        }
    }
    Ok(names.into_iter().collect())
}

/// Index `KEY=VALUE` pairs, projecting namespaced secret keys onto their
/// bare `VAR` name
///
/// Only keys for the scope's context, app and targets are projected. Direct
/// keys win over projections; among projections the earlier target wins, then
/// the first pair.
pub fn project_env(env: &[String], scope: &EnvScope) -> BTreeMap<String, String> {
    let mut direct = BTreeMap::new();
    let mut projected: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for pair in env {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        direct.insert(key.to_string(), value.to_string());
        let Some(caps) = namespaced_key_re().captures(key) else {
            continue;
        };
        let Some(rank) = scope.rank(&caps[1], &caps[2], &caps[3]) else {
            debug!("Skipping out-of-scope secret key {}", key);
            continue;
        };
        match projected.get(&caps[4]) {
            Some((best, _)) if *best <= rank => {}
            _ => {
                projected.insert(caps[4].to_string(), (rank, value.to_string()));
            }
        }
    }
    for (key, (_, value)) in projected {
        direct.entry(key).or_insert(value);
    }
    direct
}

/// Write `.env` with exactly the referenced keys that resolve from `env`
///
/// Returns the written keys. When nothing resolves any stale `.env` is removed.
pub async fn materialize_runtime_env(
    bundle_dir: &Path,
    files: &[String],
    env: &[String],
    scope: &EnvScope,
) -> Result<Vec<String>> {
    let referenced = referenced_variables(bundle_dir, files).await?;
    let available = project_env(env, scope);

    let mut keys = Vec::new();
    let mut body = String::new();
    for key in referenced {
        if let Some(value) = available.get(&key) {
            body.push_str(&format!("{}={}\n", key, render_value_plain(value)));
            keys.push(key);
        }
    }

    let path = bundle_dir.join(RUNTIME_ENV_FILE);
    if keys.is_empty() {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed stale runtime env {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(keys);
    }

    fsio::write_atomic(&path, body.as_bytes()).await?;
    debug!("Wrote {} runtime env keys to {:?}", keys.len(), path);
    Ok(keys)
}
