use chrono::Utc;
use std::sync::Arc;

use paas_alert::{Alert, AlertRouter};
use paas_compose::{prune as prune_releases, PruneOptions};
use paas_core::fail_open::fail_open;
use paas_core::types::parse_duration;
use paas_core::{ErrorKind, PaasError, Result, Severity};
use paas_deploy::{DeployRequest, Deployer, SshTransport};

use super::App;
use crate::output::Outcome;
use crate::settings::Settings;
use crate::{DeployArgs, DeployCommands};

pub async fn deploy(app: &App, args: DeployArgs) -> Result<Outcome> {
    let name = args
        .app
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| PaasError::usage("--app is required"))?;
    let vault = app
        .vault_options(args.vault_file, args.allow_untrusted_vault)
        .await?;
    let transport = SshTransport::new(app.settings.ssh_bin.clone(), app.settings.scp_bin.clone());
    let deployer = Deployer::new(app.ctx.clone(), app.config.clone(), Arc::new(transport));

    let req = DeployRequest {
        app: name.clone(),
        compose_file: args.compose_file,
        strategy: args.strategy,
        targets: args.targets,
        all_targets: args.all,
        apply: args.apply,
        health_check: args.health_check,
        allow_plaintext_secrets: args.allow_plaintext_secrets,
        vault,
        process_env: Settings::process_env(),
        now: Utc::now(),
    };

    let report = match deployer.deploy(req).await {
        Ok(report) => report,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::TransportError | ErrorKind::Timeout) {
                alert_failed_apply(app, &name, &e).await;
            }
            return Err(e);
        }
    };

    let mode = if args.apply { "applied" } else { "bundled" };
    Outcome::live()
        .field("app", &report.app)
        .field("release_id", &report.release_id)
        .field("bundle_dir", report.bundle_dir.display())
        .field("strategy", &report.strategy)
        .field("targets", report.targets.join(","))
        .field("compose_sha256", &report.compose_sha256)
        .field("bundle_sha256", &report.bundle_sha256)
        .field("vault_trusted", report.vault.trusted)
        .field("plaintext_guardrail", report.plaintext.guardrail)
        .field("result", mode)
        .rows(report.warnings.iter().map(|w| format!("warning: {}", w)).collect::<Vec<_>>())
        .data(&report)
}

/// Route a critical alert for a failed apply
async fn alert_failed_apply(app: &App, name: &str, err: &PaasError) {
    let router = AlertRouter::new(app.ctx.clone(), app.notifier());
    let mut alert = Alert::new("deploy apply", Severity::Critical, err.to_string());
    alert.fields.insert("app".to_string(), name.to_string());
    fail_open("deploy failure alert", || router.dispatch(alert, false)).await;
}

pub async fn prune(app: &App, action: DeployCommands) -> Result<Outcome> {
    let DeployCommands::Prune {
        app: name,
        keep,
        events_max_age,
    } = action;
    let events_max_age = events_max_age
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    let report = prune_releases(
        &app.ctx,
        &PruneOptions {
            app: name,
            keep,
            events_max_age,
            now: Utc::now(),
        },
    )
    .await?;
    Outcome::live()
        .field("apps_scanned", report.apps_scanned)
        .field("releases_scanned", report.releases_scanned)
        .field("releases_removed", report.releases_removed.len())
        .field("events_removed", report.events_removed)
        .field("keep", keep)
        .rows(report.releases_removed.clone())
        .data(&report)
}
