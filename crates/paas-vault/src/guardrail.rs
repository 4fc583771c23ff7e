//! Vault trust guardrail
//!
//! Locates the vault file, fingerprints its recipient headers and compares the
//! fingerprint against the pinned value in the trust store.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use paas_core::{PaasError, Result};

use crate::dotenv::{DotenvDocument, RECIPIENT_HEADER};
use crate::trust::{recipients_fingerprint, TrustStore};

/// Environment variable naming the vault file
pub const VAULT_FILE_ENV: &str = "SI_VAULT_FILE";

/// Inputs for [`check_vault`] and [`trust_vault`]
#[derive(Debug, Clone)]
pub struct VaultOptions {
    /// Explicit `--file` (or the context's configured vault file)
    pub file: Option<PathBuf>,
    /// Value of `SI_VAULT_FILE`, if set
    pub env_file: Option<PathBuf>,
    /// Directory the repository root is discovered from
    pub cwd: PathBuf,
    pub trust_store: PathBuf,
    pub allow_untrusted: bool,
}

/// Guardrail outcome
#[derive(Debug, Clone, Serialize)]
pub struct VaultReport {
    pub file: PathBuf,
    pub repo_root: PathBuf,
    pub recipient_count: usize,
    pub fingerprint: String,
    pub trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_warning: Option<String>,
    /// Parsed vault, absent when the file does not exist
    #[serde(skip)]
    pub document: Option<DotenvDocument>,
}

/// Nearest ancestor of `start` containing `.git`, else `start` itself
pub fn discover_repo_root(start: &Path) -> PathBuf {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join(".git").exists() {
            return current.to_path_buf();
        }
        dir = current.parent();
    }
    start.to_path_buf()
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    joined.components().collect()
}

/// Resolve the vault file: explicit > env > `<repo_root>/.env`
pub fn locate_vault(opts: &VaultOptions) -> (PathBuf, PathBuf) {
    let repo_root = discover_repo_root(&opts.cwd);
    let file = opts
        .file
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| opts.env_file.as_deref().filter(|p| !p.as_os_str().is_empty()))
        .map(|p| absolutize(&opts.cwd, p))
        .unwrap_or_else(|| repo_root.join(".env"));
    (file, repo_root)
}

async fn inspect(opts: &VaultOptions) -> Result<(VaultReport, Option<String>)> {
    let (file, repo_root) = locate_vault(opts);
    debug!("Checking vault {:?} (repo root {:?})", file, repo_root);

    let document = match DotenvDocument::read(&file).await {
        Ok(doc) => Some(doc),
        Err(PaasError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let mut report = VaultReport {
        file: file.clone(),
        repo_root: repo_root.clone(),
        recipient_count: 0,
        fingerprint: String::new(),
        trusted: false,
        trust_warning: None,
        document: None,
    };

    let Some(document) = document else {
        let problem = format!("vault file not found: {}", file.display());
        return Ok((report, Some(problem)));
    };

    report.recipient_count = document.recipients().len();
    if report.recipient_count == 0 {
        report.document = Some(document);
        let problem = format!(
            "no recipients found in {} (expected {:?} lines)",
            file.display(),
            RECIPIENT_HEADER
        );
        return Ok((report, Some(problem)));
    }
    report.fingerprint = recipients_fingerprint(document.recipients());
    report.document = Some(document);

    let store = TrustStore::load(&opts.trust_store).await?;
    let problem = match store.find(&repo_root, &file) {
        None => Some(format!(
            "vault trust not established for {}: run `paas vault trust --file {}`",
            file.display(),
            file.display()
        )),
        Some(entry) if entry.fingerprint.trim() != report.fingerprint => Some(format!(
            "vault trust fingerprint changed for {}: review recipients, then run `paas vault trust --file {}`",
            file.display(),
            file.display()
        )),
        Some(_) => None,
    };
    Ok((report, problem))
}

/// Run the trust guardrail
///
/// Fails with `UntrustedVault` unless the vault is pinned with a matching
/// fingerprint or `allow_untrusted` is set, in which case the report carries
/// `trusted=false` and a warning.
pub async fn check_vault(opts: &VaultOptions) -> Result<VaultReport> {
    let (mut report, problem) = inspect(opts).await?;
    match problem {
        None => {
            report.trusted = true;
            Ok(report)
        }
        Some(problem) if opts.allow_untrusted => {
            warn!("Proceeding with untrusted vault: {}", problem);
            report.trusted = false;
            report.trust_warning = Some(problem);
            Ok(report)
        }
        Some(problem) => Err(PaasError::UntrustedVault(problem)),
    }
}

/// Pin the current recipient fingerprint in the trust store
pub async fn trust_vault(opts: &VaultOptions) -> Result<VaultReport> {
    let (mut report, _) = inspect(opts).await?;
    if report.document.is_none() {
        return Err(PaasError::not_found(format!(
            "vault file {}",
            report.file.display()
        )));
    }
    if report.recipient_count == 0 {
        return Err(PaasError::usage(format!(
            "no recipients found in {} (expected {:?} lines)",
            report.file.display(),
            RECIPIENT_HEADER
        )));
    }

    let mut store = TrustStore::load(&opts.trust_store).await?;
    store.upsert(&report.repo_root, &report.file, &report.fingerprint);
    store.save(&opts.trust_store).await?;

    report.trusted = true;
    Ok(report)
}
