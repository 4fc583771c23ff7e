//! End-to-end deploy: guardrails, bundle, optional apply

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use paas_compose::{new_release_id, prepare, write_bundle, AddonStore, PrepareOptions};
use paas_core::types::validate_slug;
use paas_core::{ContextPaths, ErrorKind, PaasConfig, PaasError, Result, Severity, Target, TargetStore};
use paas_events::{EventLog, EventRecord, EventStream};
use paas_vault::{check_vault, enforce_plaintext_guardrail, PlaintextReport, VaultOptions, VaultReport};

use crate::apply::{apply_bundle, ApplyOptions, ApplyOutcome};
use crate::transport::RemoteExecutor;

/// Accepted `--strategy` values
pub const STRATEGIES: [&str; 2] = ["rolling", "recreate"];

/// One `paas deploy` invocation
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub app: String,
    pub compose_file: PathBuf,
    pub strategy: String,
    /// Explicit target names (comma lists allowed)
    pub targets: Vec<String>,
    pub all_targets: bool,
    pub apply: bool,
    pub health_check: bool,
    pub allow_plaintext_secrets: bool,
    pub vault: VaultOptions,
    /// `KEY=VALUE` pairs from the caller's environment
    pub process_env: Vec<String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub app: String,
    pub context: String,
    pub release_id: String,
    pub bundle_dir: PathBuf,
    pub strategy: String,
    pub targets: Vec<String>,
    pub compose_sha256: String,
    pub bundle_sha256: String,
    pub compose_files: Vec<String>,
    pub runtime_env_keys: Vec<String>,
    pub vault: VaultReport,
    pub plaintext: PlaintextReport,
    pub applied: Vec<ApplyOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Runs deploys for one context
pub struct Deployer {
    ctx: ContextPaths,
    config: PaasConfig,
    executor: Arc<dyn RemoteExecutor>,
}

impl Deployer {
    pub fn new(ctx: ContextPaths, config: PaasConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            ctx,
            config,
            executor,
        }
    }

    /// Validate, bundle and (with `apply`) ship a release
    ///
    /// Guardrail and preparation failures return before anything is written.
    /// A failed apply keeps the bundle, records `deploy/failed` for the target
    /// and returns the error.
    #[instrument(skip(self, req), fields(app = %req.app, context = %self.ctx.name()))]
    pub async fn deploy(&self, req: DeployRequest) -> Result<DeployReport> {
        let app = validate_slug("app", &req.app)?;
        let strategy = normalize_strategy(&req.strategy)?;
        let targets = self.resolve_targets(&req).await?;
        let target_names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

        let vault = check_vault(&req.vault).await?;
        let plaintext = enforce_plaintext_guardrail(
            &req.compose_file,
            &self.config.sensitive_key_markers,
            req.allow_plaintext_secrets,
        )
        .await?;

        let mut warnings = Vec::new();
        if let Some(warning) = &vault.trust_warning {
            warnings.push(format!("vault: {}", warning));
        }
        if plaintext.guardrail == "bypassed" {
            warnings.push(format!(
                "plaintext secret guardrail bypassed ({} findings)",
                plaintext.findings
            ));
        }

        let mut env = Vec::new();
        if let Some(doc) = &vault.document {
            let skipped = doc.ciphertext_keys();
            if !skipped.is_empty() {
                warn!("Skipping {} encrypted vault values", skipped.len());
                warnings.push(format!(
                    "encrypted vault values not materialized: {}",
                    skipped.join(",")
                ));
            }
            env.extend(doc.plaintext_pairs());
        }
        env.extend(req.process_env.iter().cloned());

        let release_id = new_release_id(req.now);
        let addons = AddonStore::new(&self.ctx).list(&app).await?;
        let prepared = prepare(
            &PrepareOptions {
                app: app.clone(),
                context: self.ctx.name().to_string(),
                release_id: release_id.clone(),
                strategy: strategy.clone(),
                targets: target_names.clone(),
                compose_file: req.compose_file.clone(),
                now: req.now,
            },
            &addons,
        )
        .await?;

        let guardrails = guardrail_fields(&vault, &plaintext);
        let bundle = write_bundle(&self.ctx, &prepared, &env, guardrails).await?;
        info!("Prepared release {} for {}", release_id, app);

        let log = EventLog::new(&self.ctx);
        let mut applied = Vec::new();
        if req.apply {
            let opts = ApplyOptions::new(self.config.remote_root.clone(), &self.config.timeouts)
                .with_health_check(req.health_check);
            for target in &targets {
                let result = apply_bundle(self.executor.as_ref(), target, &bundle, &opts).await;
                let record = |status: &str, message: String| {
                    EventRecord::new("deploy", "deploy apply", status, message)
                        .with_target(&target.name)
                        .with_field("app", &app)
                        .with_field("release_id", &release_id)
                        .with_field("targets", target_names.join(","))
                        .with_field("strategy", &strategy)
                };
                match result {
                    Ok(outcome) => {
                        let message = format!("applied {} to {}", release_id, target.name);
                        log.append(EventStream::Deployments, record("succeeded", message))
                            .await?;
                        applied.push(outcome);
                    }
                    Err(e) => {
                        let failed =
                            record("failed", e.to_string()).with_severity(Severity::Critical);
                        log.append(EventStream::Deployments, failed).await?;
                        return Err(e);
                    }
                }
            }
        } else {
            log.append(
                EventStream::Deployments,
                EventRecord::new(
                    "deploy",
                    "deploy bundle",
                    "succeeded",
                    format!("prepared release {}", release_id),
                )
                .with_field("app", &app)
                .with_field("release_id", &release_id)
                .with_field("targets", target_names.join(",")),
            )
            .await?;
        }

        let meta = &bundle.metadata;
        Ok(DeployReport {
            app,
            context: self.ctx.name().to_string(),
            release_id,
            bundle_dir: bundle.dir.clone(),
            strategy,
            targets: target_names,
            compose_sha256: meta.compose_sha256.clone(),
            bundle_sha256: meta.bundle_sha256.clone(),
            compose_files: meta.compose_files.clone(),
            runtime_env_keys: meta.runtime_env_keys.clone(),
            vault,
            plaintext,
            applied,
            warnings,
        })
    }

    /// Applying needs a concrete target; bundling alone tolerates none
    async fn resolve_targets(&self, req: &DeployRequest) -> Result<Vec<Target>> {
        let store = TargetStore::new(&self.ctx);
        match store.resolve(&req.targets, req.all_targets).await {
            Ok(targets) => Ok(targets),
            Err(e) if !req.apply && e.kind() == ErrorKind::UsageError => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn normalize_strategy(value: &str) -> Result<String> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Ok(STRATEGIES[0].to_string());
    }
    if STRATEGIES.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(PaasError::usage(format!(
            "invalid --strategy {:?} (expected rolling|recreate)",
            value
        )))
    }
}

fn guardrail_fields(vault: &VaultReport, plaintext: &PlaintextReport) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("vault_trusted".to_string(), vault.trusted.to_string());
    fields.insert("vault_fingerprint".to_string(), vault.fingerprint.clone());
    fields.insert(
        "vault_recipients".to_string(),
        vault.recipient_count.to_string(),
    );
    if let Some(warning) = &vault.trust_warning {
        fields.insert("vault_trust_warning".to_string(), warning.clone());
    }
    fields.insert(
        "plaintext_guardrail".to_string(),
        plaintext.guardrail.to_string(),
    );
    fields.insert(
        "plaintext_findings".to_string(),
        plaintext.findings.to_string(),
    );
    fields
}
