//! Compose preparation: magic substitution and additive addon merge

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, instrument};

use paas_core::types::sanitize_path_segment;
use paas_core::{PaasError, Result};

use crate::addons::AddonRecord;
use crate::magic::MagicVars;

/// File name of the resolved base compose inside a bundle
pub const BASE_COMPOSE: &str = "compose.yaml";

/// Top-level compose maps that take part in the additive merge
pub const SECTIONS: [&str; 5] = ["services", "volumes", "networks", "configs", "secrets"];

/// Key sets of the five compose sections
pub type SectionKeys = BTreeMap<&'static str, BTreeSet<String>>;

/// `compose.addon.<name>.yaml`
pub fn addon_file_name(addon: &str) -> String {
    format!("compose.addon.{}.yaml", sanitize_path_segment(addon))
}

/// Parse compose YAML and collect the keys of each section
pub fn collect_section_keys(content: &str) -> Result<SectionKeys> {
    let mut sections: SectionKeys = SECTIONS.iter().map(|s| (*s, BTreeSet::new())).collect();
    if content.trim().is_empty() {
        return Ok(sections);
    }

    let root: Value = serde_yaml::from_str(content)?;
    let root = match root {
        Value::Mapping(map) => map,
        Value::Null => return Ok(sections),
        _ => return Err(PaasError::usage("compose document must be a YAML map")),
    };

    for section in SECTIONS {
        let keys = sections.entry(section).or_default();
        match root.get(section) {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(map)) => {
                for key in map.keys() {
                    let name = match key {
                        Value::String(s) => s.trim().to_string(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => continue,
                    };
                    if !name.is_empty() {
                        keys.insert(name);
                    }
                }
            }
            Some(_) => {
                return Err(PaasError::usage(format!(
                    "compose section {:?} must be a map",
                    section
                )))
            }
        }
    }
    Ok(sections)
}

/// Fail on the first fragment key that already exists in `accumulated`
fn check_additive(accumulated: &SectionKeys, fragment: &SectionKeys, addon: &str) -> Result<()> {
    for section in SECTIONS {
        let (Some(existing), Some(incoming)) = (accumulated.get(section), fragment.get(section))
        else {
            continue;
        };
        if let Some(key) = incoming.iter().find(|k| existing.contains(*k)) {
            return Err(PaasError::AddonMergeConflict {
                addon: addon.trim().to_string(),
                section: section.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

fn merge_keys(accumulated: &mut SectionKeys, fragment: SectionKeys) {
    for (section, keys) in fragment {
        accumulated.entry(section).or_default().extend(keys);
    }
}

/// Inputs to [`prepare`]
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub app: String,
    pub context: String,
    pub release_id: String,
    pub strategy: String,
    pub targets: Vec<String>,
    pub compose_file: PathBuf,
    pub now: DateTime<Utc>,
}

/// A resolved addon fragment ready to be written into a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonArtifact {
    pub file_name: String,
    pub name: String,
    pub pack: String,
    pub content: String,
}

/// Everything a bundle needs from the compose sources
#[derive(Debug, Clone)]
pub struct PreparedCompose {
    pub app: String,
    pub context: String,
    pub release_id: String,
    pub strategy: String,
    pub targets: Vec<String>,
    pub source_file: PathBuf,
    pub resolved_compose: String,
    pub compose_sha256: String,
    /// Apply order, base compose first
    pub compose_files: Vec<String>,
    pub magic: BTreeMap<String, String>,
    pub addons: Vec<AddonArtifact>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Resolve the base compose and merge the app's addons
///
/// `addons` are applied in lower-cased name order. Each fragment may only add
/// keys; a key already present in the base or an earlier fragment fails with
/// `AddonMergeConflict`.
#[instrument(skip(opts, addons), fields(app = %opts.app, release = %opts.release_id))]
pub async fn prepare(opts: &PrepareOptions, addons: &[AddonRecord]) -> Result<PreparedCompose> {
    let raw = tokio::fs::read_to_string(&opts.compose_file)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PaasError::not_found(format!("compose file {}", opts.compose_file.display()))
            }
            _ => PaasError::Io(e),
        })?;

    let magic = MagicVars::new(
        &opts.app,
        &opts.context,
        &opts.release_id,
        &opts.strategy,
        &opts.targets,
        opts.now,
    );
    let resolved = magic.resolve(&raw)?;
    let mut accumulated = collect_section_keys(&resolved).map_err(|e| match e {
        PaasError::Yaml(err) => PaasError::usage(format!("invalid base compose YAML: {}", err)),
        other => other,
    })?;

    let mut ordered: Vec<&AddonRecord> = addons.iter().collect();
    ordered.sort_by_key(|a| a.name.to_lowercase());

    let mut compose_files = vec![BASE_COMPOSE.to_string()];
    let mut artifacts = Vec::with_capacity(ordered.len());
    for addon in ordered {
        if addon.fragment_path.trim().is_empty() {
            continue;
        }
        let raw_fragment = tokio::fs::read_to_string(&addon.fragment_path)
            .await
            .map_err(|e| {
                PaasError::usage(format!("read addon fragment {:?}: {}", addon.name, e))
            })?;
        let fragment = magic.resolve(&raw_fragment)?;
        let fragment_keys = collect_section_keys(&fragment).map_err(|e| {
            PaasError::usage(format!("invalid addon fragment {:?}: {}", addon.name, e))
        })?;
        check_additive(&accumulated, &fragment_keys, &addon.name)?;
        merge_keys(&mut accumulated, fragment_keys);

        let file_name = addon_file_name(&addon.name);
        debug!("Merged addon {} as {}", addon.name, file_name);
        if !compose_files.contains(&file_name) {
            compose_files.push(file_name.clone());
        }
        artifacts.push(AddonArtifact {
            file_name,
            name: addon.name.clone(),
            pack: addon.pack.clone(),
            content: fragment,
        });
    }

    Ok(PreparedCompose {
        app: opts.app.clone(),
        context: opts.context.clone(),
        release_id: opts.release_id.clone(),
        strategy: opts.strategy.clone(),
        targets: opts.targets.clone(),
        source_file: opts.compose_file.clone(),
        compose_sha256: sha256_hex(resolved.as_bytes()),
        resolved_compose: resolved,
        compose_files,
        magic: magic.to_env_map(),
        addons: artifacts,
    })
}
