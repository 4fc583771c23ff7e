//! # paas-alert
//!
//! Alerts are routed by severity through `alerts/policy.json` to one of
//! `telegram`, `log` or `disabled`. Every dispatch appends a row to the
//! `alerts` event stream.

pub mod history;
pub mod policy;
pub mod router;
pub mod telegram;

pub use history::{AlertEntry, AlertHistory, AlertStatus};
pub use policy::{AlertPolicy, Channel, PolicyStore, PolicyUpdate, Route};
pub use router::{Alert, AlertRouter, DispatchReport, FAILURE_GUIDANCE};
pub use telegram::{TelegramConfig, TelegramConfigStore, TelegramNotifier, API_BASE_ENV, DEFAULT_API_BASE};
