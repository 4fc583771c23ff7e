//! Collectors: rules that turn event records into incident candidates
//!
//! Every collector sees every record; a single record can therefore surface
//! under more than one collector (a failing health deploy is both a deploy
//! and a health incident).

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use paas_core::Severity;

use crate::incident::{IncidentCategory, IncidentEvent};
use crate::log::EventRecord;

const CANDIDATE_STATUSES: [&str; 4] = ["failed", "error", "degraded", "retrying"];

fn is_candidate_status(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    CANDIDATE_STATUSES.contains(&status.as_str())
}

/// Severity implied by a failing status
fn infer_severity(status: &str) -> Severity {
    match status.trim().to_ascii_lowercase().as_str() {
        "failed" | "error" => Severity::Critical,
        "degraded" | "retrying" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn record_severity(record: &EventRecord) -> Severity {
    if record.severity != Severity::Info {
        record.severity
    } else {
        infer_severity(&record.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collector {
    DeployHook,
    HealthPoll,
    RuntimeWatch,
}

impl Collector {
    pub const ALL: [Collector; 3] = [
        Collector::DeployHook,
        Collector::HealthPoll,
        Collector::RuntimeWatch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collector::DeployHook => "deploy-hook",
            Collector::HealthPoll => "health-poll",
            Collector::RuntimeWatch => "runtime-watch",
        }
    }

    pub fn category(&self) -> IncidentCategory {
        match self {
            Collector::DeployHook => IncidentCategory::Deploy,
            Collector::HealthPoll => IncidentCategory::Health,
            Collector::RuntimeWatch => IncidentCategory::Runtime,
        }
    }

    /// Severity for `record` if this collector claims it
    fn classify(&self, record: &EventRecord) -> Option<Severity> {
        let source = record.source.trim().to_ascii_lowercase();
        match self {
            Collector::DeployHook => {
                (source == "deploy" && is_candidate_status(&record.status))
                    .then(|| record_severity(record))
            }
            Collector::HealthPoll => {
                let command = record.command.to_ascii_lowercase();
                let related =
                    source == "alert" || command.contains("health") || command.contains("ingress");
                let failing = is_candidate_status(&record.status)
                    || matches!(record.severity, Severity::Warning | Severity::Critical);
                if !(related && failing) {
                    return None;
                }
                Some(record_severity(record).max(Severity::Warning))
            }
            Collector::RuntimeWatch => {
                (source == "audit" && is_candidate_status(&record.status))
                    .then(|| record_severity(record))
            }
        }
    }

    /// Derive an incident from `record`, or `None` when it does not match
    pub fn collect(&self, record: &EventRecord, window: TimeDelta) -> Option<IncidentEvent> {
        let severity = self.classify(record)?;

        let message = if record.message.trim().is_empty() {
            format!("{} status={}", record.command.trim(), record.status.trim())
        } else {
            record.message.clone()
        };
        let mut metadata = record.fields.clone();
        metadata.insert("command".to_string(), record.command.trim().to_string());
        metadata.insert(
            "status".to_string(),
            record.status.trim().to_ascii_lowercase(),
        );

        Some(IncidentEvent::new(
            self.name(),
            self.category(),
            severity,
            &message,
            &record.target,
            &record.command,
            &record.status,
            record.timestamp,
            window,
            metadata,
        ))
    }
}

impl fmt::Display for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-collector counts for one scan
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectorStats {
    pub name: String,
    pub category: IncidentCategory,
    /// Records the collector claimed
    pub matched: usize,
    /// Distinct `(dedupe_key, window_start)` groups among them
    pub candidates: usize,
}

/// One `(dedupe_key, window_start)` group from a scan
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Representative incident: earliest sample, highest severity, newest message
    pub incident: IncidentEvent,
    /// Sample times, ascending
    pub samples: Vec<DateTime<Utc>>,
}

impl Candidate {
    pub fn key(&self) -> String {
        queue_key(&self.incident.dedupe_key, &self.incident.window_start)
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.samples
            .first()
            .copied()
            .unwrap_or(self.incident.triggered_at)
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.samples
            .last()
            .copied()
            .unwrap_or(self.incident.triggered_at)
    }
}

pub fn queue_key(dedupe_key: &str, window_start: &str) -> String {
    format!("{}|{}", dedupe_key, window_start)
}

/// Run every collector over `records` and group the matches
///
/// Candidates come back ordered by their newest sample, newest first.
pub fn collect_candidates(
    records: &[EventRecord],
    window: TimeDelta,
) -> (Vec<Candidate>, Vec<CollectorStats>) {
    let mut ordered: Vec<&EventRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut groups: BTreeMap<String, Candidate> = BTreeMap::new();
    let mut stats = Vec::with_capacity(Collector::ALL.len());

    for collector in Collector::ALL {
        let mut matched = 0;
        let mut keys = std::collections::BTreeSet::new();

        for record in &ordered {
            let Some(incident) = collector.collect(record, window) else {
                continue;
            };
            matched += 1;
            let key = queue_key(&incident.dedupe_key, &incident.window_start);
            keys.insert(key.clone());

            match groups.get_mut(&key) {
                Some(group) => {
                    group.incident.severity = group.incident.severity.max(incident.severity);
                    if !incident.message.trim().is_empty() {
                        group.incident.message = incident.message;
                    }
                    group.samples.push(incident.triggered_at);
                }
                None => {
                    let triggered_at = incident.triggered_at;
                    groups.insert(
                        key,
                        Candidate {
                            incident,
                            samples: vec![triggered_at],
                        },
                    );
                }
            }
        }

        stats.push(CollectorStats {
            name: collector.name().to_string(),
            category: collector.category(),
            matched,
            candidates: keys.len(),
        });
    }

    let mut candidates: Vec<Candidate> = groups.into_values().collect();
    candidates.sort_by(|a, b| {
        b.last_seen()
            .cmp(&a.last_seen())
            .then_with(|| a.key().cmp(&b.key()))
    });
    (candidates, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(source: &str, command: &str, status: &str, minute: u32, second: u32) -> EventRecord {
        let mut r = EventRecord::new(source, command, status, "").with_target("edge-a");
        r.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, second).unwrap();
        r
    }

    #[test]
    fn test_deploy_hook_matches_failing_deploys() {
        let c = Collector::DeployHook;
        let window = TimeDelta::minutes(5);

        let incident = c
            .collect(&record("deploy", "deploy apply", "failed", 0, 30), window)
            .unwrap();
        assert_eq!(incident.category, IncidentCategory::Deploy);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.message, "deploy apply status=failed");
        assert_eq!(incident.metadata["status"], "failed");

        let degraded = c
            .collect(&record("deploy", "deploy apply", "degraded", 0, 30), window)
            .unwrap();
        assert_eq!(degraded.severity, Severity::Warning);

        assert!(c
            .collect(&record("deploy", "deploy apply", "succeeded", 0, 30), window)
            .is_none());
        assert!(c
            .collect(&record("audit", "deploy apply", "failed", 0, 30), window)
            .is_none());
    }

    #[test]
    fn test_health_poll_bumps_to_warning() {
        let window = TimeDelta::minutes(5);
        let mut r = record("monitor", "ingress check", "ok", 1, 0);
        r.severity = Severity::Warning;
        let incident = Collector::HealthPoll.collect(&r, window).unwrap();
        assert_eq!(incident.category, IncidentCategory::Health);
        assert_eq!(incident.severity, Severity::Warning);

        let alert = record("alert", "alert test", "retrying", 1, 0);
        assert_eq!(
            Collector::HealthPoll.collect(&alert, window).unwrap().severity,
            Severity::Warning
        );

        let quiet = record("monitor", "ingress check", "ok", 1, 0);
        assert!(Collector::HealthPoll.collect(&quiet, window).is_none());
    }

    #[test]
    fn test_runtime_watch_matches_audit_failures() {
        let window = TimeDelta::minutes(5);
        let r = record("audit", "target add", "error", 2, 0);
        let incident = Collector::RuntimeWatch.collect(&r, window).unwrap();
        assert_eq!(incident.category, IncidentCategory::Runtime);
        assert_eq!(incident.source, "runtime-watch");
    }

    #[test]
    fn test_grouping_keeps_earliest_and_counts_samples() {
        let records = vec![
            record("deploy", "deploy apply", "failed", 2, 30),
            record("deploy", "deploy apply", "degraded", 0, 30),
            record("deploy", "deploy apply", "failed", 7, 0),
        ];
        let (candidates, stats) = collect_candidates(&records, TimeDelta::minutes(5));

        let deploy = &stats[0];
        assert_eq!(deploy.name, "deploy-hook");
        assert_eq!(deploy.matched, 3);
        // failed and degraded have different signals
        assert_eq!(deploy.candidates, 3);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[1].matched, 0);

        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.samples.len() == 1));
        assert_eq!(candidates[0].incident.window_start, "2026-03-01T10:05:00Z");
    }

    #[test]
    fn test_grouping_merges_same_signal_in_window() {
        let records = vec![
            record("deploy", "deploy apply", "failed", 2, 30),
            record("deploy", "deploy apply", "failed", 0, 30),
        ];
        let (candidates, _) = collect_candidates(&records, TimeDelta::minutes(5));
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.samples.len(), 2);
        assert_eq!(c.incident.triggered_at, c.first_seen());
        assert!(c.last_seen() > c.first_seen());
    }
}
