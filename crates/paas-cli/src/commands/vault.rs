use paas_compose::secret_key_name;
use paas_core::types::validate_slug;
use paas_core::{PaasError, Result, TargetStore};
use paas_vault::{check_vault, trust_vault, VaultReport};

use super::App;
use crate::output::Outcome;
use crate::VaultCommands;

fn report_fields(report: &VaultReport) -> Outcome {
    let mut outcome = Outcome::live()
        .field("file", report.file.display())
        .field("repo_root", report.repo_root.display())
        .field("recipients", report.recipient_count)
        .field("fingerprint", &report.fingerprint)
        .field("trusted", report.trusted);
    if let Some(warning) = &report.trust_warning {
        outcome = outcome.field("trust_warning", warning);
    }
    outcome
}

pub async fn run(app: &App, action: VaultCommands) -> Result<Outcome> {
    match action {
        VaultCommands::Trust { file } => {
            let opts = app.vault_options(file, false).await?;
            let report = trust_vault(&opts).await?;
            report_fields(&report)
                .field("trust_store", opts.trust_store.display())
                .data(&report)
        }
        VaultCommands::Check {
            file,
            allow_untrusted,
        } => {
            let opts = app.vault_options(file, allow_untrusted).await?;
            let report = check_vault(&opts).await?;
            report_fields(&report).data(&report)
        }
    }
}

pub async fn secret_key(
    app: &App,
    name: &str,
    var: &str,
    target: Option<String>,
    namespace: &str,
    no_namespace: bool,
) -> Result<Outcome> {
    let name = validate_slug("app", name)?;
    let var = var.trim();
    if var.is_empty() {
        return Err(PaasError::usage("--name is required"));
    }
    let target = match target.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        Some(target) => target,
        None => TargetStore::new(&app.ctx)
            .load()
            .await?
            .current_target
            .ok_or_else(|| {
                PaasError::usage("no current target; pass --target or run `paas target use`")
            })?,
    };
    let namespace = (!no_namespace).then_some(namespace);
    let key = secret_key_name(app.ctx.name(), namespace, &name, &target, var);
    Ok(Outcome::live()
        .field("key", &key)
        .field("app", &name)
        .field("target", &target)
        .row(key))
}
