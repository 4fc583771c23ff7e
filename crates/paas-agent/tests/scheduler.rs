use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

use paas_agent::lock;
use paas_agent::scheduler::{MSG_DISABLED, MSG_INCIDENT_MISSING, MSG_NO_INCIDENTS, MSG_QUEUED};
use paas_agent::{
    AgentStore, EnableAgent, OfflineFakeCodex, ProfileCatalog, RunLog, RunOnceRequest, RunStatus,
    Scheduler,
};
use paas_core::config::IncidentConfig;
use paas_core::layout::ContextPaths;
use paas_core::{ErrorKind, StateRoot};
use paas_events::{EventLog, EventRecord, EventStream};
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    ctx: ContextPaths,
    profiles: std::path::PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StateRoot::new(temp_dir.path().join("state"))
            .context("default")
            .unwrap();
        let profiles = temp_dir.path().join("profiles");
        seed_profile(&profiles, "ops", true);

        AgentStore::new(&ctx)
            .enable(EnableAgent {
                name: "ops-agent".into(),
                targets: vec!["all".into()],
                profile: None,
            })
            .await
            .unwrap();

        Self {
            _temp_dir: temp_dir,
            ctx,
            profiles,
        }
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.ctx.clone(),
            IncidentConfig::default(),
            ProfileCatalog::new(&self.profiles),
        )
    }

    async fn deploy_failed(&self) {
        EventLog::new(&self.ctx)
            .append(
                EventStream::Deployments,
                EventRecord::new("deploy", "deploy apply", "failed", "compose up failed")
                    .with_target("edge-a"),
            )
            .await
            .unwrap();
    }

    async fn runs(&self) -> usize {
        RunLog::new(&self.ctx).tail(None, 100).await.unwrap().len()
    }
}

fn seed_profile(root: &Path, id: &str, auth: bool) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    if auth {
        std::fs::write(dir.join("auth.json"), r#"{"token":"x"}"#).unwrap();
    }
}

fn request(now: DateTime<Utc>) -> RunOnceRequest {
    RunOnceRequest {
        agent: "ops-agent".into(),
        incident: None,
        owner: "test".into(),
        now,
    }
}

#[tokio::test]
async fn test_empty_queue_is_noop() {
    let fx = Fixture::new().await;

    let report = fx.scheduler().run_once(request(Utc::now())).await.unwrap();
    assert_eq!(report.status, RunStatus::Noop);
    assert_eq!(report.message, MSG_NO_INCIDENTS);
    assert!(report.incident_id.is_empty());
    let plan = report.plan.unwrap();
    assert!(plan.ready);
    assert!(plan.prompt.contains("no active incident selected"));
    assert_eq!(fx.runs().await, 1);
}

#[tokio::test]
async fn test_failed_deploy_is_queued() {
    let fx = Fixture::new().await;
    fx.deploy_failed().await;
    fx.deploy_failed().await;

    let report = fx.scheduler().run_once(request(Utc::now())).await.unwrap();
    assert_eq!(report.status, RunStatus::Queued);
    assert_eq!(report.message, MSG_QUEUED);
    assert!(report.incident_id.starts_with("inc-"));
    assert_eq!(report.sync.as_ref().unwrap().inserted, 1);

    let plan = report.plan.unwrap();
    assert!(plan.prompt.starts_with("ops-agent: analyze incident inc-"));
    assert!(plan.prompt.contains("for target edge-a"));
    assert!(plan.prompt.ends_with("compose up failed"));

    let execution = report.execution.unwrap();
    assert!(!execution.executed);
    assert_eq!(execution.mode, "deferred");
    assert!(!report.record.executed);
    assert_eq!(report.record.inserted, 1);
    assert!(report.record.runtime_ready);
}

#[tokio::test]
async fn test_requested_incident_by_key_or_id() {
    let fx = Fixture::new().await;
    fx.deploy_failed().await;
    let first = fx.scheduler().run_once(request(Utc::now())).await.unwrap();

    let mut req = request(Utc::now());
    req.incident = first.incident_key.clone();
    let by_key = fx.scheduler().run_once(req).await.unwrap();
    assert_eq!(by_key.status, RunStatus::Queued);
    assert_eq!(by_key.incident_id, first.incident_id);

    let mut req = request(Utc::now());
    req.incident = Some("inc-missing".into());
    let missing = fx.scheduler().run_once(req).await.unwrap();
    assert_eq!(missing.status, RunStatus::Blocked);
    assert_eq!(missing.message, MSG_INCIDENT_MISSING);
}

#[tokio::test]
async fn test_missing_auth_cache_blocks() {
    let fx = Fixture::new().await;
    seed_profile(&fx.profiles, "noauth", false);
    AgentStore::new(&fx.ctx)
        .enable(EnableAgent {
            name: "ops-agent".into(),
            targets: vec![],
            profile: Some("noauth".into()),
        })
        .await
        .unwrap();
    fx.deploy_failed().await;

    let report = fx.scheduler().run_once(request(Utc::now())).await.unwrap();
    assert_eq!(report.status, RunStatus::Blocked);
    assert!(report.message.contains("auth cache not found"));
    assert!(!report.record.runtime_ready);
    assert_eq!(report.record.runtime_profile, "noauth");
}

#[tokio::test]
async fn test_no_profiles_blocks() {
    let fx = Fixture::new().await;
    std::fs::remove_dir_all(&fx.profiles).unwrap();

    let report = fx.scheduler().run_once(request(Utc::now())).await.unwrap();
    assert_eq!(report.status, RunStatus::Blocked);
    assert!(report.message.contains("no codex profiles"));
    assert!(report.plan.is_none());
}

#[tokio::test]
async fn test_disabled_agent_is_blocked_without_sync() {
    let fx = Fixture::new().await;
    AgentStore::new(&fx.ctx).disable("ops-agent").await.unwrap();
    fx.deploy_failed().await;

    let report = fx.scheduler().run_once(request(Utc::now())).await.unwrap();
    assert_eq!(report.status, RunStatus::Blocked);
    assert_eq!(report.message, MSG_DISABLED);
    assert!(report.sync.is_none());
    assert_eq!(fx.runs().await, 1);
}

#[tokio::test]
async fn test_held_lock_records_blocked_run() {
    let fx = Fixture::new().await;
    let now = Utc::now();
    lock::acquire(&fx.ctx, "ops-agent", "other-worker", now)
        .await
        .unwrap();

    let err = fx.scheduler().run_once(request(now)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockActive);
    assert!(err.to_string().contains("owner=other-worker"));

    let runs = RunLog::new(&fx.ctx).tail(Some("ops-agent"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Blocked);
    assert!(runs[0].message.starts_with("lock is active"));

    // The other worker's lock is left in place
    assert!(fx.ctx.agent_lock_file("ops-agent").unwrap().exists());
}

#[tokio::test]
async fn test_each_run_stamps_agent_with_record_timestamp() {
    let fx = Fixture::new().await;
    let scheduler = fx.scheduler();

    for _ in 0..3 {
        let report = scheduler.run_once(request(Utc::now())).await.unwrap();
        let agent = AgentStore::new(&fx.ctx).get("ops-agent").await.unwrap();
        assert_eq!(agent.last_run_at, Some(report.record.timestamp));
        assert_eq!(agent.last_run_id.as_deref(), Some(report.run_id.as_str()));
        assert_eq!(agent.last_run_state.as_deref(), Some("noop"));
    }
    assert_eq!(fx.runs().await, 3);
    assert!(!fx.ctx.agent_lock_file("ops-agent").unwrap().exists());
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let fx = Fixture::new().await;
    let mut req = request(Utc::now());
    req.agent = "ghost".into();

    let err = fx.scheduler().run_once(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(fx.runs().await, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_offline_runner_executes_plan() {
    let fx = Fixture::new().await;
    fx.deploy_failed().await;
    let runner = OfflineFakeCodex::new(
        "read line; echo \"<<WORK_REPORT_BEGIN>> restarted api on edge-a <<WORK_REPORT_END>>\"",
        Duration::from_secs(15),
    );

    let report = fx
        .scheduler()
        .with_runner(Some(runner))
        .run_once(request(Utc::now()))
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.message, "restarted api on edge-a");
    assert!(report.record.executed);
    assert_eq!(report.execution.unwrap().mode, "offline-fake-codex");
}

#[tokio::test]
async fn test_failed_sync_still_records_one_run() {
    let fx = Fixture::new().await;
    let queue_path = fx.ctx.root().join("events").join("incidents.jsonl");
    std::fs::create_dir_all(&queue_path).unwrap();

    let now = Utc::now();
    assert!(fx.scheduler().run_once(request(now)).await.is_err());

    let runs = RunLog::new(&fx.ctx).tail(None, 100).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(!runs[0].message.is_empty());

    let agent = AgentStore::new(&fx.ctx).get("ops-agent").await.unwrap();
    assert_eq!(agent.last_run_at, Some(runs[0].timestamp));
    assert_eq!(agent.last_run_state.as_deref(), Some("failed"));
    assert!(!fx.ctx.agent_lock_file("ops-agent").unwrap().exists());
}
