//! One scheduler cycle for one agent
//!
//! ```text
//! lock ──► sync incident queue ──► select incident ──► runtime plan
//!   │                                                      │
//!   └── release ◄── stamp agent ◄── append run record ◄────┘
//! ```
//!
//! Every cycle appends exactly one run record, including blocked ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use paas_core::config::IncidentConfig;
use paas_core::fail_open::fail_open;
use paas_core::layout::ContextPaths;
use paas_core::{PaasError, Result};
use paas_events::{IncidentQueue, QueueEntry, SyncOptions, SyncReport};

use crate::executor::{execute, ExecutionResult, OfflineFakeCodex};
use crate::lock;
use crate::runs::{new_run_id, AgentRunRecord, RunLog, RunStatus};
use crate::runtime::{build_plan, ProfileCatalog, RuntimePlan};
use crate::store::{AgentConfig, AgentStore};

pub const MSG_DISABLED: &str = "agent is disabled";
pub const MSG_INCIDENT_MISSING: &str = "requested incident was not found in queue";
pub const MSG_NO_INCIDENTS: &str = "no queued incidents available";
pub const MSG_QUEUED: &str = "incident queued for remediation policy evaluation";

#[derive(Debug, Clone)]
pub struct RunOnceRequest {
    pub agent: String,
    /// Incident id or queue key
    pub incident: Option<String>,
    pub owner: String,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub agent: String,
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub incident_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_key: Option<String>,
    pub lock_recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RuntimePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
    pub record: AgentRunRecord,
}

pub struct Scheduler {
    ctx: ContextPaths,
    incident: IncidentConfig,
    catalog: ProfileCatalog,
    runner: Option<OfflineFakeCodex>,
}

impl Scheduler {
    pub fn new(ctx: ContextPaths, incident: IncidentConfig, catalog: ProfileCatalog) -> Self {
        Self {
            ctx,
            incident,
            catalog,
            runner: None,
        }
    }

    pub fn with_runner(mut self, runner: Option<OfflineFakeCodex>) -> Self {
        self.runner = runner;
        self
    }

    /// Run one cycle
    ///
    /// A held lock still records a `blocked` run, then fails with
    /// `LockActive`.
    #[instrument(skip(self, req), fields(agent = %req.agent))]
    pub async fn run_once(&self, req: RunOnceRequest) -> Result<RunReport> {
        let store = AgentStore::new(&self.ctx);
        let agent = store.get(&req.agent).await?;
        let run_id = new_run_id(req.now);

        let claimed = lock::acquire(&self.ctx, &agent.name, &req.owner, req.now).await?;
        if !claimed.acquired {
            let reason = claimed.reason.unwrap_or_default();
            let mut record = AgentRunRecord::new(&agent.name, &run_id, RunStatus::Blocked, req.now);
            record.message = reason;
            self.finish(&store, &agent, &record).await?;
            let holder = claimed.holder;
            return Err(PaasError::LockActive {
                owner: holder.as_ref().map(|h| h.owner.clone()).unwrap_or_default(),
                heartbeat: holder
                    .map(|h| h.heartbeat_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            });
        }
        if claimed.recovered {
            warn!("Recovered stale lock for agent {}", agent.name);
        }

        let result = self.cycle(&store, &agent, &run_id, &req, claimed.recovered).await;
        let released = lock::release(&self.ctx, &agent.name).await;
        let report = result?;
        released?;
        Ok(report)
    }

    async fn cycle(
        &self,
        store: &AgentStore,
        agent: &AgentConfig,
        run_id: &str,
        req: &RunOnceRequest,
        lock_recovered: bool,
    ) -> Result<RunReport> {
        let mut record = AgentRunRecord::new(&agent.name, run_id, RunStatus::Noop, req.now);

        if !agent.enabled {
            record.status = RunStatus::Blocked;
            record.message = MSG_DISABLED.to_string();
            self.finish(store, agent, &record).await?;
            return Ok(RunReport {
                agent: agent.name.clone(),
                run_id: run_id.to_string(),
                status: record.status,
                message: record.message.clone(),
                incident_id: String::new(),
                incident_key: None,
                lock_recovered,
                plan: None,
                execution: None,
                sync: None,
                record,
            });
        }

        let queue = IncidentQueue::new(&self.ctx);
        let mut sync_opts = SyncOptions::from_config(&self.incident);
        sync_opts.now = req.now;
        let sync = match queue.sync(&sync_opts).await {
            Ok(sync) => sync,
            Err(e) => return self.fail(store, agent, record, e).await,
        };
        record.collected = sync.collected;
        record.inserted = sync.inserted;
        record.updated = sync.updated;
        record.pruned = sync.pruned;
        record.queue_total = sync.queue_total;
        record.queue_path = Some(sync.queue_path.clone());
        record.collector_count = sync.collectors.len();

        let requested = req
            .incident
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty());
        let selected: Result<Option<QueueEntry>> = match requested {
            Some(id) => queue.find(id).await,
            None => queue.latest().await,
        };
        let selected = match selected {
            Ok(selected) => selected,
            Err(e) => return self.fail(store, agent, record, e).await,
        };

        let (mut status, mut message) = match (&selected, requested) {
            (None, Some(_)) => (RunStatus::Blocked, MSG_INCIDENT_MISSING.to_string()),
            _ => (RunStatus::Noop, MSG_NO_INCIDENTS.to_string()),
        };

        let plan = match build_plan(
            &self.catalog,
            &agent.name,
            agent.profile.as_deref(),
            selected.as_ref(),
        )
        .await
        {
            Ok(plan) => Some(plan),
            Err(e) => {
                status = RunStatus::Blocked;
                message = e.to_string();
                None
            }
        };

        let mut execution = None;
        if let Some(plan) = &plan {
            record.incident_id = plan.incident_id.clone();
            record.runtime_mode = plan.mode.clone();
            record.runtime_profile = plan.profile_id.clone();
            record.runtime_auth = plan.auth_path.display().to_string();
            record.runtime_ready = plan.ready;
            if !plan.ready {
                status = RunStatus::Blocked;
                message = plan
                    .reason
                    .clone()
                    .unwrap_or_else(|| "runtime adapter is not ready".to_string());
            } else if selected.is_some() {
                status = RunStatus::Queued;
                message = MSG_QUEUED.to_string();
                match execute(plan, self.runner.as_ref()).await {
                    Ok(result) => {
                        if result.executed {
                            status = RunStatus::Succeeded;
                            message = result.note.clone();
                            record.executed = true;
                        }
                        execution = Some(result);
                    }
                    Err(e) => {
                        status = RunStatus::Failed;
                        message = e.to_string();
                        record.executed = true;
                    }
                }
            }
        }

        record.status = status;
        record.message = message;
        self.finish(store, agent, &record).await?;
        info!("Agent {} run {} finished: {}", agent.name, run_id, record.status);

        Ok(RunReport {
            agent: agent.name.clone(),
            run_id: run_id.to_string(),
            status: record.status,
            message: record.message.clone(),
            incident_id: record.incident_id.clone(),
            incident_key: selected.map(|e| e.key),
            lock_recovered,
            plan,
            execution,
            sync: Some(sync),
            record,
        })
    }

    /// Close the cycle as `failed`, then return the error that ended it
    async fn fail(
        &self,
        store: &AgentStore,
        agent: &AgentConfig,
        mut record: AgentRunRecord,
        err: PaasError,
    ) -> Result<RunReport> {
        record.status = RunStatus::Failed;
        record.message = err.to_string();
        warn!("Agent {} run {} failed: {}", agent.name, record.run_id, err);
        fail_open("agent run record", || self.finish(store, agent, &record)).await;
        Err(err)
    }

    /// Append the run record, then stamp the agent with its timestamp
    async fn finish(
        &self,
        store: &AgentStore,
        agent: &AgentConfig,
        record: &AgentRunRecord,
    ) -> Result<()> {
        RunLog::new(&self.ctx).append(record).await?;
        store
            .record_run(&agent.name, &record.run_id, record.status.as_str(), record.timestamp)
            .await?;
        Ok(())
    }
}
