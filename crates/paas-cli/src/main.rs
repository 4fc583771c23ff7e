//! paas CLI - deploys, incidents, agents and alerts for compose apps
//!
//! Usage:
//!   paas target add --name edge-a --host 10.0.0.4   Register a deploy host
//!   paas deploy --app billing-api --apply           Bundle and ship a release
//!   paas incident sync                              Rebuild the incident queue
//!   paas agent run-once --name ops-agent            Run one scheduler cycle
//!   paas alert test --severity warning              Exercise alert routing

mod commands;
mod output;
mod settings;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::commands::App;
use crate::output::{print_failure, print_success};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "paas")]
#[command(author, version, about = "Compose deploys with an incident and agent loop")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print a machine-readable JSON envelope
    #[arg(long, global = true)]
    json: bool,

    /// Context to operate on (defaults to the selected context)
    #[arg(long, global = true, value_name = "NAME")]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage named contexts
    Context {
        #[command(subcommand)]
        action: ContextCommands,
    },

    /// Manage deploy targets
    Target {
        #[command(subcommand)]
        action: TargetCommands,
    },

    /// Bundle a release and optionally apply it
    #[command(args_conflicts_with_subcommands = true)]
    Deploy {
        #[command(subcommand)]
        action: Option<DeployCommands>,

        #[command(flatten)]
        args: DeployArgs,
    },

    /// App configuration
    App {
        #[command(subcommand)]
        action: AppCommands,
    },

    /// Secret naming helpers
    Secret {
        #[command(subcommand)]
        action: SecretCommands,
    },

    /// Vault trust guardrail
    Vault {
        #[command(subcommand)]
        action: VaultCommands,
    },

    /// Incident queue
    Incident {
        #[command(subcommand)]
        action: IncidentCommands,
    },

    /// Remediation agents
    Agent {
        #[command(subcommand)]
        action: AgentCommands,
    },

    /// Alert routing and notifier
    Alert {
        #[command(subcommand)]
        action: AlertCommands,
    },

    /// Event streams
    Events {
        #[command(subcommand)]
        action: EventsCommands,
    },
}

#[derive(Subcommand)]
pub enum ContextCommands {
    /// Create the context directory tree
    Init {
        /// Context name (defaults to the selected context)
        name: Option<String>,

        /// Vault file used by deploys in this context
        #[arg(long)]
        vault_file: Option<String>,
    },

    /// List contexts
    List,

    /// Select the context used when --context is absent
    Use {
        name: String,
    },

    /// Show the selected context
    Show,
}

#[derive(Subcommand)]
pub enum TargetCommands {
    /// Register a target
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        host: String,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        user: String,

        /// key or password
        #[arg(long, default_value = "key")]
        auth_method: String,

        /// Comma separated K:V labels
        #[arg(long)]
        labels: Option<String>,

        #[arg(long)]
        ingress_provider: Option<String>,

        #[arg(long)]
        ingress_domain: Option<String>,

        /// dns or l4
        #[arg(long)]
        ingress_lb_mode: Option<String>,

        /// Make this the current target
        #[arg(long)]
        default: bool,
    },

    /// List targets
    List,

    /// Select the current target
    Use {
        #[arg(long)]
        name: String,
    },

    /// Remove a target
    Remove {
        #[arg(long)]
        name: String,

        /// Allow removing the current target
        #[arg(long)]
        force: bool,
    },

    /// Show one target
    Show {
        #[arg(long)]
        name: String,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    #[arg(long)]
    app: Option<String>,

    /// Target names (comma lists allowed)
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Deploy to every target
    #[arg(long)]
    all: bool,

    #[arg(long, default_value = "compose.yaml")]
    compose_file: PathBuf,

    /// rolling or recreate
    #[arg(long, default_value = "rolling")]
    strategy: String,

    /// Upload and apply the bundle
    #[arg(long)]
    apply: bool,

    /// Run the health check after compose up
    #[arg(long)]
    health_check: bool,

    /// Vault file (overrides the context setting)
    #[arg(long)]
    vault_file: Option<PathBuf>,

    #[arg(long)]
    allow_untrusted_vault: bool,

    #[arg(long)]
    allow_plaintext_secrets: bool,
}

#[derive(Subcommand)]
pub enum DeployCommands {
    /// Remove old release bundles and aged events
    Prune {
        #[arg(long)]
        app: Option<String>,

        /// Releases kept per app
        #[arg(long, default_value = "5")]
        keep: usize,

        /// Drop events older than this (e.g. 720h, 30d)
        #[arg(long)]
        events_max_age: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// Compose addon fragments
    Addon {
        #[command(subcommand)]
        action: AddonCommands,
    },
}

#[derive(Subcommand)]
pub enum AddonCommands {
    /// Register an addon fragment
    Add {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        pack: String,

        #[arg(long)]
        fragment: PathBuf,
    },

    /// List addons of an app
    List {
        #[arg(long)]
        app: String,
    },

    /// Remove an addon
    Remove {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Print the namespaced key for an app variable
    Key {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,

        /// Defaults to the current target
        #[arg(long)]
        target: Option<String>,

        #[arg(long, default_value = "default")]
        namespace: String,

        /// Leave the NS segment out
        #[arg(long)]
        no_namespace: bool,
    },
}

#[derive(Subcommand)]
pub enum VaultCommands {
    /// Pin the vault's current recipient fingerprint
    Trust {
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run the trust guardrail
    Check {
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long)]
        allow_untrusted: bool,
    },
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// Collect incidents from recent events
    Sync {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List queued incidents
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Move an incident to acknowledged or resolved
    SetStatus {
        /// Incident id or queue key
        #[arg(long)]
        id: String,

        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Create or re-enable an agent
    Enable {
        #[arg(long)]
        name: String,

        /// Codex profile id
        #[arg(long)]
        profile: Option<String>,

        /// all or a comma list of targets
        #[arg(long, default_value = "all")]
        targets: String,
    },

    /// Disable an agent
    Disable {
        #[arg(long)]
        name: String,
    },

    /// Show agent configs
    Status {
        #[arg(long)]
        name: Option<String>,
    },

    /// Show recent runs, newest first
    Logs {
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "20")]
        tail: usize,
    },

    /// Run one scheduler cycle
    RunOnce {
        #[arg(long)]
        name: String,

        /// Incident id or queue key
        #[arg(long)]
        incident: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// Save the telegram bot config
    SetupTelegram {
        #[arg(long)]
        bot_token: String,

        #[arg(long)]
        chat_id: String,

        /// Validate without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Route and send a test alert
    Test {
        #[arg(long, default_value = "info")]
        severity: String,

        #[arg(long, default_value = "paas alert test")]
        message: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Show alert history
    History {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        severity: Option<String>,
    },

    /// Severity routing policy
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the routing policy
    Show,

    /// Update the routing policy (telegram, log or disabled)
    Set {
        #[arg(long)]
        default: Option<String>,

        #[arg(long)]
        info: Option<String>,

        #[arg(long)]
        warning: Option<String>,

        #[arg(long)]
        critical: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// List deploy, alert and audit events, newest first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        severity: Option<String>,
    },
}

impl Commands {
    /// Stable command name used in envelopes and audit records
    fn name(&self) -> &'static str {
        match self {
            Commands::Context { action } => match action {
                ContextCommands::Init { .. } => "context init",
                ContextCommands::List => "context list",
                ContextCommands::Use { .. } => "context use",
                ContextCommands::Show => "context show",
            },
            Commands::Target { action } => match action {
                TargetCommands::Add { .. } => "target add",
                TargetCommands::List => "target list",
                TargetCommands::Use { .. } => "target use",
                TargetCommands::Remove { .. } => "target remove",
                TargetCommands::Show { .. } => "target show",
            },
            Commands::Deploy { action: None, .. } => "deploy",
            Commands::Deploy { action: Some(DeployCommands::Prune { .. }), .. } => "deploy prune",
            Commands::App { action: AppCommands::Addon { action } } => match action {
                AddonCommands::Add { .. } => "app addon add",
                AddonCommands::List { .. } => "app addon list",
                AddonCommands::Remove { .. } => "app addon remove",
            },
            Commands::Secret { action: SecretCommands::Key { .. } } => "secret key",
            Commands::Vault { action } => match action {
                VaultCommands::Trust { .. } => "vault trust",
                VaultCommands::Check { .. } => "vault check",
            },
            Commands::Incident { action } => match action {
                IncidentCommands::Sync { .. } => "incident sync",
                IncidentCommands::List { .. } => "incident list",
                IncidentCommands::SetStatus { .. } => "incident set-status",
            },
            Commands::Agent { action } => match action {
                AgentCommands::Enable { .. } => "agent enable",
                AgentCommands::Disable { .. } => "agent disable",
                AgentCommands::Status { .. } => "agent status",
                AgentCommands::Logs { .. } => "agent logs",
                AgentCommands::RunOnce { .. } => "agent run-once",
            },
            Commands::Alert { action } => match action {
                AlertCommands::SetupTelegram { .. } => "alert setup-telegram",
                AlertCommands::Test { .. } => "alert test",
                AlertCommands::History { .. } => "alert history",
                AlertCommands::Policy { action: PolicyCommands::Show } => "alert policy show",
                AlertCommands::Policy { action: PolicyCommands::Set { .. } } => "alert policy set",
            },
            Commands::Events { .. } => "events list",
        }
    }

    /// Commands whose failures are written to the audit stream
    fn mutates_state(&self) -> bool {
        !matches!(
            self,
            Commands::Context { action: ContextCommands::List | ContextCommands::Show }
                | Commands::Target { action: TargetCommands::List | TargetCommands::Show { .. } }
                | Commands::App { action: AppCommands::Addon { action: AddonCommands::List { .. } } }
                | Commands::Secret { .. }
                | Commands::Vault { action: VaultCommands::Check { .. } }
                | Commands::Incident { action: IncidentCommands::List { .. } }
                | Commands::Agent { action: AgentCommands::Status { .. } | AgentCommands::Logs { .. } }
                | Commands::Alert { action: AlertCommands::History { .. } }
                | Commands::Alert { action: AlertCommands::Policy { action: PolicyCommands::Show } }
                | Commands::Events { .. }
        )
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn exit_code(err: &paas_core::PaasError) -> ExitCode {
    ExitCode::from(u8::try_from(err.kind().exit_code()).unwrap_or(1))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let command = cli.command.name();
    let audit = cli.command.mutates_state();
    let settings = Settings::from_env();

    let app = match App::open(settings, cli.context.as_deref()).await {
        Ok(app) => app,
        Err(e) => {
            let context = cli.context.as_deref().unwrap_or(paas_core::DEFAULT_CONTEXT);
            print_failure(command, context, cli.json, &e);
            return Ok(exit_code(&e));
        }
    };

    match commands::run(&app, cli.command).await {
        Ok(outcome) => {
            print_success(command, app.ctx.name(), cli.json, &outcome);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if audit {
                app.audit_failure(command, &e).await;
            }
            print_failure(command, app.ctx.name(), cli.json, &e);
            Ok(exit_code(&e))
        }
    }
}
