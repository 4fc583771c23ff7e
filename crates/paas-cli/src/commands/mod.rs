//! Command handlers
//!
//! Each handler returns an [`Outcome`]; printing and exit codes are decided in
//! `main`.

mod addon;
mod agent;
mod alert;
mod context;
mod deploy;
mod events;
mod incident;
mod target;
mod vault;

use std::path::PathBuf;

use paas_alert::TelegramNotifier;
use paas_core::fail_open::fail_open;
use paas_core::{ContextPaths, PaasConfig, PaasError, Result, Severity, StateRoot};
use paas_events::{EventLog, EventRecord, EventStream};
use paas_vault::trust::default_trust_store_path;
use paas_vault::VaultOptions;

use crate::output::Outcome;
use crate::settings::Settings;
use crate::{AppCommands, Commands, SecretCommands};

/// Resolved state for one invocation
pub struct App {
    pub settings: Settings,
    pub root: StateRoot,
    pub ctx: ContextPaths,
    pub config: PaasConfig,
}

impl App {
    pub async fn open(settings: Settings, explicit_context: Option<&str>) -> Result<Self> {
        let root = StateRoot::resolve(settings.state_root.as_deref())?;
        let ctx = root.select_context(explicit_context).await?;
        let config = root.load_config()?;
        Ok(Self {
            settings,
            root,
            ctx,
            config,
        })
    }

    /// Append a `failed` audit record; never replaces the command's error
    pub async fn audit_failure(&self, command: &str, err: &PaasError) {
        let record = EventRecord::new("audit", command, "failed", err.to_string())
            .with_severity(Severity::Warning)
            .with_field("error_kind", err.kind().as_str());
        let log = EventLog::new(&self.ctx);
        fail_open("audit append", || log.append(EventStream::Audit, record)).await;
    }

    /// Vault lookup inputs: explicit file, else the context's vault file
    pub async fn vault_options(&self, file: Option<PathBuf>, allow_untrusted: bool) -> Result<VaultOptions> {
        let file = match file {
            Some(file) => Some(file),
            None => self
                .ctx
                .load_config()
                .await?
                .and_then(|c| c.vault_file)
                .map(PathBuf::from),
        };
        let trust_store = match &self.settings.trust_store {
            Some(path) => path.clone(),
            None => default_trust_store_path()?,
        };
        Ok(VaultOptions {
            file,
            env_file: self.settings.vault_file.clone(),
            cwd: std::env::current_dir()?,
            trust_store,
            allow_untrusted,
        })
    }

    pub fn notifier(&self) -> TelegramNotifier {
        let api_base = self
            .settings
            .telegram_api_base
            .clone()
            .unwrap_or_else(|| self.config.telegram_api_base.clone());
        TelegramNotifier::new(api_base, self.config.timeouts.notifier())
    }
}

pub async fn run(app: &App, command: Commands) -> Result<Outcome> {
    match command {
        Commands::Context { action } => context::run(app, action).await,
        Commands::Target { action } => target::run(app, action).await,
        Commands::Deploy { action: Some(action), .. } => deploy::prune(app, action).await,
        Commands::Deploy { action: None, args } => deploy::deploy(app, args).await,
        Commands::App { action: AppCommands::Addon { action } } => addon::run(app, action).await,
        Commands::Secret { action: SecretCommands::Key { app: name, name: var, target, namespace, no_namespace } } => {
            vault::secret_key(app, &name, &var, target, &namespace, no_namespace).await
        }
        Commands::Vault { action } => vault::run(app, action).await,
        Commands::Incident { action } => incident::run(app, action).await,
        Commands::Agent { action } => agent::run(app, action).await,
        Commands::Alert { action } => alert::run(app, action).await,
        Commands::Events { action } => events::run(app, action).await,
    }
}

/// Parse a `--severity` value
pub(crate) fn parse_severity(value: &str) -> Result<Severity> {
    value.parse::<Severity>().map_err(PaasError::usage)
}
