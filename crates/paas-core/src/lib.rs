//! # paas-core
//!
//! Shared foundation for the paas deploy, incident and agent loop.
//!
//! - Every piece of state lives under a named context (`layout`)
//! - Every JSON write is atomic, every JSONL write is a single append (`fsio`)
//! - Deploy hosts are kept in a per-context target store (`targets`)
//! - Errors carry a stable kind that maps to CLI exit codes (`error`)

mod error;

pub mod config;
pub mod fail_open;
pub mod fsio;
pub mod layout;
pub mod redact;
pub mod targets;
pub mod types;

pub use config::PaasConfig;
pub use error::{ErrorKind, PaasError, Result};
pub use layout::{ContextConfig, ContextPaths, StateRoot, DEFAULT_CONTEXT};
pub use targets::{AuthMethod, IngressLbMode, NewTarget, Target, TargetSet, TargetStore};
pub use types::Severity;
