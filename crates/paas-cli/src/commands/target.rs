use paas_core::{AuthMethod, IngressLbMode, NewTarget, PaasError, Result, Target, TargetStore};

use super::App;
use crate::output::Outcome;
use crate::TargetCommands;

fn summary(target: &Target, current: bool) -> String {
    format!(
        "{}{} {}@{}:{} auth={}",
        target.name,
        if current { " (current)" } else { "" },
        target.user,
        target.host,
        target.port,
        target.auth_method
    )
}

fn target_fields(outcome: Outcome, target: &Target) -> Outcome {
    outcome
        .field("name", &target.name)
        .field("host", &target.host)
        .field("port", target.port)
        .field("user", &target.user)
        .field("auth_method", target.auth_method)
        .field("labels", target.labels.join(","))
}

pub async fn run(app: &App, action: TargetCommands) -> Result<Outcome> {
    let store = TargetStore::new(&app.ctx);
    match action {
        TargetCommands::Add {
            name,
            host,
            port,
            user,
            auth_method,
            labels,
            ingress_provider,
            ingress_domain,
            ingress_lb_mode,
            default,
        } => {
            let auth_method: AuthMethod = auth_method.parse().map_err(PaasError::usage)?;
            let ingress_lb_mode = ingress_lb_mode
                .map(|m| m.parse::<IngressLbMode>().map_err(PaasError::usage))
                .transpose()?;
            let labels = labels
                .map(|l| {
                    l.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let target = store
                .add(NewTarget {
                    name,
                    host,
                    port,
                    user,
                    auth_method,
                    labels,
                    make_current: default,
                    ingress_provider,
                    ingress_domain,
                    ingress_lb_mode,
                })
                .await?;
            let set = store.load().await?;
            target_fields(Outcome::live(), &target)
                .field("current", set.is_current(&target.name))
                .data(&target)
        }
        TargetCommands::List => {
            let set = store.load().await?;
            let rows: Vec<String> = set
                .targets
                .iter()
                .map(|t| summary(t, set.is_current(&t.name)))
                .collect();
            Outcome::live()
                .field("count", set.targets.len())
                .field("current", set.current_target.clone().unwrap_or_default())
                .rows(rows)
                .data(&set)
        }
        TargetCommands::Use { name } => {
            let target = store.use_target(&name).await?;
            Ok(Outcome::live().field("current", &target.name))
        }
        TargetCommands::Remove { name, force } => {
            let removed = store.remove(&name, force).await?;
            Ok(Outcome::live()
                .field("removed", &removed.removed.name)
                .field("current", removed.current_target.unwrap_or_default()))
        }
        TargetCommands::Show { name } => {
            let target = store.get(&name).await?;
            let set = store.load().await?;
            target_fields(Outcome::live(), &target)
                .field("current", set.is_current(&target.name))
                .data(&target)
        }
    }
}
