use paas_alert::{Alert, AlertHistory, AlertRouter, Channel, PolicyStore, PolicyUpdate, TelegramConfigStore};
use paas_core::{PaasError, Result, Severity};

use super::events::describe;
use super::{parse_severity, App};
use crate::output::Outcome;
use crate::{AlertCommands, PolicyCommands};

fn parse_channel(value: Option<String>) -> Result<Option<Channel>> {
    value.as_deref().map(str::parse::<Channel>).transpose()
}

pub async fn run(app: &App, action: AlertCommands) -> Result<Outcome> {
    match action {
        AlertCommands::SetupTelegram {
            bot_token,
            chat_id,
            dry_run,
        } => {
            let store = TelegramConfigStore::new(&app.ctx);
            if dry_run {
                if bot_token.trim().is_empty() {
                    return Err(PaasError::usage("--bot-token is required"));
                }
                if chat_id.trim().is_empty() {
                    return Err(PaasError::usage("--chat-id is required"));
                }
            } else {
                store.save(&bot_token, &chat_id).await?;
            }
            // The token itself is never echoed
            Ok(Outcome::live()
                .dry_run(dry_run)
                .field("bot_token_set", true)
                .field("chat_id", chat_id.trim())
                .field("config_path", store.path().display()))
        }
        AlertCommands::Test {
            severity,
            message,
            dry_run,
        } => {
            let severity = parse_severity(&severity)?;
            let router = AlertRouter::new(app.ctx.clone(), app.notifier());
            let report = router
                .dispatch(Alert::new("alert test", severity, message), dry_run)
                .await?;
            Outcome::live()
                .dry_run(dry_run)
                .field("severity", severity)
                .field("channel", report.channel)
                .field("status", report.status.as_str())
                .field("policy_path", report.policy_path.display())
                .field("history_path", report.history_path.display())
                .data(&report)
        }
        AlertCommands::History { limit, severity } => {
            let severity = severity.as_deref().map(parse_severity).transpose()?;
            let history = AlertHistory::new(&app.ctx);
            let rows = history.list(limit.max(1), severity).await?;
            Outcome::live()
                .field("count", rows.len())
                .field("history_path", history.path().display())
                .rows(
                    rows.iter()
                        .map(|r| match &r.guidance {
                            Some(g) => format!("{} (guidance: {})", describe(r), g),
                            None => describe(r),
                        })
                        .collect::<Vec<_>>(),
                )
                .data(&rows)
        }
        AlertCommands::Policy { action } => {
            let store = PolicyStore::new(&app.ctx);
            let (policy, updated) = match action {
                PolicyCommands::Show => (store.load().await?, false),
                PolicyCommands::Set {
                    default,
                    info,
                    warning,
                    critical,
                } => {
                    let update = PolicyUpdate {
                        default_channel: parse_channel(default)?,
                        info: parse_channel(info)?,
                        warning: parse_channel(warning)?,
                        critical: parse_channel(critical)?,
                    };
                    if update.is_empty() {
                        return Err(PaasError::usage(
                            "alert policy set needs at least one of --default, --info, --warning, --critical",
                        ));
                    }
                    (store.update(update).await?, true)
                }
            };
            let mut outcome = Outcome::live()
                .field("policy_path", store.path().display())
                .field("default", policy.default_channel);
            for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
                outcome = outcome.field(severity.as_str(), policy.channel_for(severity));
            }
            outcome.field("updated", updated).data(&policy)
        }
    }
}
