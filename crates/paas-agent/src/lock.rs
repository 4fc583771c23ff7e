//! Per-agent heartbeat lock with TTL recovery
//!
//! The lock is a JSON file at `agents/locks/<agent>.lock.json`. A lock whose
//! heartbeat is older than [`lock_ttl`] belongs to a crashed owner and is
//! taken over; so is a lock file that cannot be parsed.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use paas_core::fsio;
use paas_core::layout::ContextPaths;
use paas_core::Result;

pub const LOCK_TTL_SECS: i64 = 15 * 60;

pub fn lock_ttl() -> TimeDelta {
    TimeDelta::seconds(LOCK_TTL_SECS)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLockState {
    pub agent: String,
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockOutcome {
    pub acquired: bool,
    pub recovered: bool,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Holder of an active lock
    #[serde(skip)]
    pub holder: Option<AgentLockState>,
}

enum Existing {
    Absent,
    Unreadable,
    Held(AgentLockState),
}

async fn read_existing(path: &std::path::Path) -> Result<Existing> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Existing::Absent),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<AgentLockState>(&raw) {
        Ok(state) => Ok(Existing::Held(state)),
        Err(e) => {
            warn!("Treating unreadable lock {:?} as stale: {}", path, e);
            Ok(Existing::Unreadable)
        }
    }
}

/// Claim the lock for `agent` at `now`
///
/// An active lock (heartbeat no older than the TTL) is reported with
/// `acquired=false`; it is not an error at this level.
pub async fn acquire(
    ctx: &ContextPaths,
    agent: &str,
    owner: &str,
    now: DateTime<Utc>,
) -> Result<LockOutcome> {
    let path = ctx.agent_lock_file(agent)?;

    let recovered = match read_existing(&path).await? {
        Existing::Absent => false,
        Existing::Unreadable => true,
        Existing::Held(state) => {
            if now - state.heartbeat_at <= lock_ttl() {
                let reason = format!(
                    "lock is active (owner={} heartbeat={})",
                    state.owner,
                    state.heartbeat_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                return Ok(LockOutcome {
                    acquired: false,
                    recovered: false,
                    path,
                    reason: Some(reason),
                    holder: Some(state),
                });
            }
            debug!(
                "Recovering stale lock for {} (owner={}, heartbeat={})",
                agent, state.owner, state.heartbeat_at
            );
            true
        }
    };

    let state = AgentLockState {
        agent: agent.trim().to_string(),
        owner: owner.trim().to_string(),
        pid: std::process::id(),
        acquired_at: now,
        heartbeat_at: now,
    };
    fsio::write_json_pretty(&path, &state).await?;

    Ok(LockOutcome {
        acquired: true,
        recovered,
        path,
        reason: None,
        holder: None,
    })
}

/// Remove the lock file; a missing file is fine
pub async fn release(ctx: &ContextPaths, agent: &str) -> Result<()> {
    let path = ctx.agent_lock_file(agent)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_core::StateRoot;
    use tempfile::TempDir;

    fn ctx(temp_dir: &TempDir) -> ContextPaths {
        StateRoot::new(temp_dir.path()).context("default").unwrap()
    }

    async fn seed(ctx: &ContextPaths, heartbeat: DateTime<Utc>) {
        let state = AgentLockState {
            agent: "ops-agent".into(),
            owner: "old".into(),
            pid: 1,
            acquired_at: heartbeat,
            heartbeat_at: heartbeat,
        };
        fsio::write_json_pretty(&ctx.agent_lock_file("ops-agent").unwrap(), &state)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fresh_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ctx(&temp_dir);
        let now = Utc::now();

        let outcome = acquire(&ctx, "ops-agent", "me", now).await.unwrap();
        assert!(outcome.acquired);
        assert!(!outcome.recovered);
        assert!(outcome.path.ends_with("agents/locks/ops-agent.lock.json"));

        let second = acquire(&ctx, "ops-agent", "other", now).await.unwrap();
        assert!(!second.acquired);
        assert!(second.reason.unwrap().contains("owner=me"));

        release(&ctx, "ops-agent").await.unwrap();
        release(&ctx, "ops-agent").await.unwrap();
        assert!(acquire(&ctx, "ops-agent", "other", now).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn test_stale_lock_is_recovered() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ctx(&temp_dir);
        let now = Utc::now();
        seed(&ctx, now - TimeDelta::minutes(30)).await;

        let outcome = acquire(&ctx, "ops-agent", "new", now).await.unwrap();
        assert!(outcome.acquired);
        assert!(outcome.recovered);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ctx(&temp_dir);
        let now = Utc::now();

        seed(&ctx, now - lock_ttl() + TimeDelta::seconds(1)).await;
        let held = acquire(&ctx, "ops-agent", "new", now).await.unwrap();
        assert!(!held.acquired);
        assert_eq!(held.holder.unwrap().owner, "old");

        seed(&ctx, now - lock_ttl() - TimeDelta::seconds(1)).await;
        let taken = acquire(&ctx, "ops-agent", "new", now).await.unwrap();
        assert!(taken.acquired);
        assert!(taken.recovered);
    }

    #[tokio::test]
    async fn test_garbage_lock_counts_as_stale() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ctx(&temp_dir);
        let path = ctx.agent_lock_file("ops-agent").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let outcome = acquire(&ctx, "ops-agent", "new", Utc::now()).await.unwrap();
        assert!(outcome.acquired);
        assert!(outcome.recovered);
    }
}
