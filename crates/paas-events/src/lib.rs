//! # paas-events
//!
//! Append-only event streams for one context and the deduplicated incident
//! queue derived from them.
//!
//! - `log`: JSONL streams (`deployments`, `alerts`, `audit`, `agent-runs`)
//! - `collectors`: deploy-hook, health-poll and runtime-watch rules
//! - `queue`: merge, escalation and retention of incidents

pub mod collectors;
pub mod incident;
pub mod log;
pub mod queue;

pub use collectors::{Collector, CollectorStats};
pub use incident::{IncidentCategory, IncidentEvent, IncidentStatus};
pub use log::{EventFilter, EventLog, EventRecord, EventStream};
pub use queue::{IncidentQueue, QueueEntry, SyncOptions, SyncReport};
