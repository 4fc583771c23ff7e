//! # paas-agent
//!
//! Agents watch the incident queue of one context. A scheduler cycle
//! (`run_once`) claims the agent's heartbeat lock, syncs the queue, picks an
//! incident and prepares a runtime plan bound to a codex profile. Plans are
//! handed back to the caller; only the offline fake runner executes anything.

pub mod executor;
pub mod lock;
pub mod runs;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use executor::{ExecutionResult, OfflineFakeCodex, OFFLINE_FAKE_CODEX_CMD_ENV, OFFLINE_FAKE_CODEX_ENV};
pub use lock::{lock_ttl, AgentLockState, LockOutcome};
pub use runs::{AgentRunRecord, RunLog, RunStatus};
pub use runtime::{default_profiles_root, ProfileCatalog, RuntimePlan, PROFILES_ROOT_ENV};
pub use scheduler::{RunOnceRequest, RunReport, Scheduler};
pub use store::{AgentConfig, AgentStore, EnableAgent, ALL_TARGETS};
