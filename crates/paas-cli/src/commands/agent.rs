use chrono::Utc;

use paas_agent::{
    default_profiles_root, AgentConfig, AgentRunRecord, AgentStore, EnableAgent, OfflineFakeCodex,
    ProfileCatalog, RunLog, RunOnceRequest, Scheduler,
};
use paas_core::Result;

use super::App;
use crate::output::Outcome;
use crate::AgentCommands;

fn describe_agent(agent: &AgentConfig) -> String {
    let last = match (&agent.last_run_at, &agent.last_run_state) {
        (Some(at), Some(state)) => format!(
            " last_run={} {}",
            at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            state
        ),
        _ => String::new(),
    };
    format!(
        "{} enabled={} targets={} profile={}{}",
        agent.name,
        agent.enabled,
        agent.targets.join(","),
        agent.profile.as_deref().unwrap_or("-"),
        last
    )
}

fn describe_run(run: &AgentRunRecord) -> String {
    let incident = match run.incident_id.as_str() {
        "" => String::new(),
        id => format!(" incident={}", id),
    };
    format!(
        "{} {} {}{}: {}",
        run.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        run.agent,
        run.status,
        incident,
        run.message
    )
}

pub async fn run(app: &App, action: AgentCommands) -> Result<Outcome> {
    let store = AgentStore::new(&app.ctx);
    match action {
        AgentCommands::Enable {
            name,
            profile,
            targets,
        } => {
            let agent = store
                .enable(EnableAgent {
                    name,
                    targets: vec![targets],
                    profile,
                })
                .await?;
            Outcome::live()
                .field("name", &agent.name)
                .field("enabled", agent.enabled)
                .field("targets", agent.targets.join(","))
                .field("config_path", store.path().display())
                .data(&agent)
        }
        AgentCommands::Disable { name } => {
            let agent = store.disable(&name).await?;
            Outcome::live()
                .field("name", &agent.name)
                .field("enabled", agent.enabled)
                .data(&agent)
        }
        AgentCommands::Status { name } => {
            let agents = match name {
                Some(name) => vec![store.get(&name).await?],
                None => store.list().await?,
            };
            Outcome::live()
                .field("count", agents.len())
                .field("config_path", store.path().display())
                .rows(agents.iter().map(describe_agent).collect::<Vec<_>>())
                .data(&agents)
        }
        AgentCommands::Logs { name, tail } => {
            let log = RunLog::new(&app.ctx);
            let runs = log.tail(name.as_deref(), tail).await?;
            Outcome::live()
                .field("count", runs.len())
                .field("log_path", log.path().display())
                .rows(runs.iter().map(describe_run).collect::<Vec<_>>())
                .data(&runs)
        }
        AgentCommands::RunOnce { name, incident } => {
            let profiles_root = match &app.settings.profiles_root {
                Some(root) => root.clone(),
                None => default_profiles_root()?,
            };
            let runner = OfflineFakeCodex::from_env_values(
                app.settings.fake_codex.as_deref(),
                app.settings.fake_codex_cmd.as_deref(),
                app.config.timeouts.agent_exec(),
            )?;
            let scheduler = Scheduler::new(
                app.ctx.clone(),
                app.config.incident.clone(),
                ProfileCatalog::new(profiles_root),
            )
            .with_runner(runner);
            let report = scheduler
                .run_once(RunOnceRequest {
                    agent: name,
                    incident,
                    owner: format!("cli:{}", std::process::id()),
                    now: Utc::now(),
                })
                .await?;
            let mut outcome = Outcome::live()
                .field("agent", &report.agent)
                .field("run_id", &report.run_id)
                .field("status", report.status)
                .field("message", &report.message)
                .field("lock_recovered", report.lock_recovered);
            if !report.incident_id.is_empty() {
                outcome = outcome.field("incident_id", &report.incident_id);
            }
            if let Some(plan) = &report.plan {
                outcome = outcome
                    .field("runtime_profile", &plan.profile_id)
                    .field("runtime_ready", plan.ready);
            }
            outcome.data(&report)
        }
    }
}
