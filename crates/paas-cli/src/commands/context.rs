use paas_core::{PaasConfig, Result};

use super::App;
use crate::output::Outcome;
use crate::ContextCommands;

pub async fn run(app: &App, action: ContextCommands) -> Result<Outcome> {
    match action {
        ContextCommands::Init { name, vault_file } => {
            let ctx = match name {
                Some(name) => app.root.context(&name)?,
                None => app.ctx.clone(),
            };
            let config = ctx.init(vault_file).await?;
            let wrote_config = PaasConfig::write_default(app.root.path())?;
            if app.root.current_context().await?.is_none() {
                app.root.set_current_context(ctx.name()).await?;
            }
            Outcome::live()
                .field("name", ctx.name())
                .field("root", ctx.root().display())
                .field("config_written", wrote_config)
                .data(&config)
        }
        ContextCommands::List => {
            let current = app.root.current_context().await?;
            let names = app.root.list_contexts().await?;
            let rows = names.iter().map(|n| {
                if current.as_deref() == Some(n.as_str()) {
                    format!("{} (current)", n)
                } else {
                    n.clone()
                }
            });
            Outcome::live()
                .field("count", names.len())
                .field("current", current.clone().unwrap_or_default())
                .rows(rows.collect::<Vec<_>>())
                .data(&names)
        }
        ContextCommands::Use { name } => {
            let ctx = app.root.context(&name)?;
            if !ctx.exists().await {
                return Err(paas_core::PaasError::not_found(format!(
                    "context {:?} (run `paas context init {}`)",
                    ctx.name(),
                    ctx.name()
                )));
            }
            app.root.set_current_context(ctx.name()).await?;
            Ok(Outcome::live().field("current", ctx.name()))
        }
        ContextCommands::Show => {
            let config = app.ctx.load_config().await?;
            let mut outcome = Outcome::live()
                .field("name", app.ctx.name())
                .field("root", app.ctx.root().display())
                .field("initialized", config.is_some())
                .field("state_root", app.root.path().display());
            if let Some(vault_file) = config.as_ref().and_then(|c| c.vault_file.clone()) {
                outcome = outcome.field("vault_file", vault_file);
            }
            outcome.data(&config)
        }
    }
}
