//! Route an alert by severity and deliver it
//!
//! Every send attempt ends in exactly one history row, including failures.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use paas_core::fail_open::fail_open;
use paas_core::layout::ContextPaths;
use paas_core::{Result, Severity};

use crate::history::{AlertEntry, AlertHistory, AlertStatus};
use crate::policy::{Channel, PolicyStore, Route};
use crate::telegram::{TelegramConfigStore, TelegramNotifier};

pub const FAILURE_GUIDANCE: &str = "Verify Telegram bot token/chat id and outbound network access.";

#[derive(Debug, Clone)]
pub struct Alert {
    pub command: String,
    pub severity: Severity,
    pub target: String,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(command: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            severity,
            target: String::new(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// `[SEVERITY] command (target): message`
    pub fn render(&self) -> String {
        let severity = self.severity.as_str().to_uppercase();
        let message = self.message.trim();
        match self.target.trim() {
            "" => format!("[{}] {}: {}", severity, self.command.trim(), message),
            target => format!("[{}] {} ({}): {}", severity, self.command.trim(), target, message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub channel: Channel,
    pub status: AlertStatus,
    pub policy_path: PathBuf,
    pub history_path: PathBuf,
}

pub struct AlertRouter {
    ctx: ContextPaths,
    notifier: TelegramNotifier,
}

impl AlertRouter {
    pub fn new(ctx: ContextPaths, notifier: TelegramNotifier) -> Self {
        Self { ctx, notifier }
    }

    pub async fn route(&self, severity: Severity) -> Result<Route> {
        PolicyStore::new(&self.ctx).route(severity).await
    }

    /// Deliver `alert` over its routed channel and record the outcome
    ///
    /// A telegram failure is recorded as `failed` with guidance and then
    /// returned.
    pub async fn dispatch(&self, alert: Alert, dry_run: bool) -> Result<DispatchReport> {
        let route = self.route(alert.severity).await?;
        let history = AlertHistory::new(&self.ctx);

        let delivery = if dry_run {
            Ok(AlertStatus::DryRun)
        } else {
            match route.channel {
                Channel::Disabled => Ok(AlertStatus::Suppressed),
                Channel::Log => {
                    info!("{}", alert.render());
                    Ok(AlertStatus::Logged)
                }
                Channel::Telegram => self.send_telegram(&alert).await.map(|()| AlertStatus::Sent),
            }
        };

        let mut fields = alert.fields.clone();
        fields.insert("channel".to_string(), route.channel.to_string());
        let mut entry = AlertEntry {
            command: alert.command.clone(),
            severity: alert.severity,
            status: AlertStatus::Failed,
            target: alert.target.clone(),
            message: alert.message.clone(),
            guidance: None,
            fields,
        };

        match delivery {
            Ok(status) => {
                entry.status = status;
                history.record(entry).await?;
                Ok(DispatchReport {
                    channel: route.channel,
                    status,
                    policy_path: route.policy_path,
                    history_path: history.path(),
                })
            }
            Err(e) => {
                warn!("Alert delivery failed: {}", e);
                entry.guidance = Some(FAILURE_GUIDANCE.to_string());
                entry
                    .fields
                    .insert("delivery_error".to_string(), e.to_string());
                fail_open("alert history append", || history.record(entry)).await;
                Err(e)
            }
        }
    }

    async fn send_telegram(&self, alert: &Alert) -> Result<()> {
        let config = TelegramConfigStore::new(&self.ctx).load().await?;
        self.notifier.send(&config, &alert.render()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let alert = Alert::new("deploy apply", Severity::Critical, " up failed ");
        assert_eq!(alert.render(), "[CRITICAL] deploy apply: up failed");
        assert_eq!(
            alert.with_target("edge-a").render(),
            "[CRITICAL] deploy apply (edge-a): up failed"
        );
    }
}
