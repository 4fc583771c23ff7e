//! Deduplicated incident queue
//!
//! The queue is a materialized view over the event streams: `sync` rescans the
//! newest records, merges candidates into `events/incidents.jsonl` and applies
//! retention. The file is fully rewritten under the store lock.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use paas_core::config::IncidentConfig;
use paas_core::fsio::{self, StoreLock};
use paas_core::layout::ContextPaths;
use paas_core::redact::{redact_fields, redact_value};
use paas_core::{PaasError, Result};

use crate::collectors::{collect_candidates, Candidate, CollectorStats};
use crate::incident::{IncidentEvent, IncidentStatus};
use crate::log::{EventLog, EventStream};

/// Smallest number of records a sync scans
pub const MIN_SCAN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub key: String,
    pub incident: IncidentEvent,
    #[serde(default)]
    pub status: IncidentStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seen_count: u64,
}

impl QueueEntry {
    fn from_candidate(candidate: Candidate) -> Self {
        let key = candidate.key();
        let first_seen = candidate.first_seen();
        let last_seen = candidate.last_seen();
        let seen_count = candidate.samples.len().max(1) as u64;
        let mut incident = candidate.incident;
        incident.metadata = redact_fields(&incident.metadata);
        Self {
            key,
            first_seen,
            last_seen,
            seen_count,
            incident,
            status: IncidentStatus::Open,
        }
    }

    /// Fold samples newer than `last_seen` into this entry
    ///
    /// Returns false when the candidate carries nothing new.
    fn absorb(&mut self, candidate: &Candidate) -> bool {
        let fresh: Vec<DateTime<Utc>> = candidate
            .samples
            .iter()
            .copied()
            .filter(|t| *t > self.last_seen)
            .collect();
        let Some(newest) = fresh.iter().max().copied() else {
            return false;
        };

        self.seen_count += fresh.len() as u64;
        self.last_seen = newest;

        let incoming = &candidate.incident;
        self.incident.severity = self.incident.severity.max(incoming.severity);
        if !incoming.message.trim().is_empty() {
            self.incident.message = incoming.message.clone();
        }
        if !incoming.target.trim().is_empty() {
            self.incident.target = incoming.target.clone();
        }
        if !incoming.signal.trim().is_empty() {
            self.incident.signal = incoming.signal.clone();
        }
        for (k, v) in &incoming.metadata {
            self.incident
                .metadata
                .insert(k.clone(), redact_value(k, v));
        }
        if self.status == IncidentStatus::Resolved {
            self.status = IncidentStatus::Open;
        }
        true
    }
}

/// Parameters for [`IncidentQueue::sync`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Newest candidate groups merged per sync
    pub limit: usize,
    pub max_entries: usize,
    pub max_age: TimeDelta,
    pub window: TimeDelta,
    pub now: DateTime<Utc>,
}

impl SyncOptions {
    pub fn from_config(config: &IncidentConfig) -> Self {
        Self {
            limit: config.collect_limit,
            max_entries: config.max_entries,
            max_age: config.max_age(),
            window: config.window(),
            now: Utc::now(),
        }
    }

    fn scan_size(&self) -> usize {
        self.limit.saturating_mul(6).max(MIN_SCAN)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub collected: usize,
    pub inserted: usize,
    pub updated: usize,
    pub pruned: usize,
    pub queue_total: usize,
    pub queue_path: PathBuf,
    pub collectors: Vec<CollectorStats>,
}

#[derive(Debug, Clone)]
pub struct IncidentQueue {
    path: PathBuf,
    events: EventLog,
}

impl IncidentQueue {
    pub fn new(ctx: &ContextPaths) -> Self {
        let events = EventLog::new(ctx);
        Self {
            path: events.path(EventStream::Incidents),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries sorted by `last_seen` descending
    pub async fn load(&self) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = fsio::read_jsonl(&self.path).await?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn save(&self, entries: &[QueueEntry]) -> Result<()> {
        fsio::write_jsonl(&self.path, entries).await
    }

    /// Look up an entry by incident id or queue key
    pub async fn find(&self, id_or_key: &str) -> Result<Option<QueueEntry>> {
        let needle = id_or_key.trim();
        if needle.is_empty() {
            return Ok(None);
        }
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|e| e.incident.id == needle || e.key == needle))
    }

    /// Most recently seen entry, if any
    pub async fn latest(&self) -> Result<Option<QueueEntry>> {
        Ok(self.load().await?.into_iter().next())
    }

    pub async fn set_status(&self, id_or_key: &str, status: IncidentStatus) -> Result<QueueEntry> {
        let _lock = StoreLock::acquire(&self.path).await?;
        let mut entries = self.load().await?;
        let needle = id_or_key.trim();
        let entry = entries
            .iter_mut()
            .find(|e| e.incident.id == needle || e.key == needle)
            .ok_or_else(|| PaasError::not_found(format!("incident {:?}", needle)))?;
        entry.status = status;
        let updated = entry.clone();
        self.save(&entries).await?;
        Ok(updated)
    }

    /// Rescan the event streams and merge new incidents into the queue
    #[instrument(skip(self, opts), fields(queue = %self.path.display()))]
    pub async fn sync(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let _lock = StoreLock::acquire(&self.path).await?;

        let records = self
            .events
            .recent(&EventStream::RECORDS, opts.scan_size())
            .await?;
        let (mut candidates, collectors) = collect_candidates(&records, opts.window);
        if opts.limit > 0 {
            candidates.truncate(opts.limit);
        }
        let collected = candidates.len();

        let mut entries = self.load().await?;
        let existing = entries.len();
        let mut fresh_keys = HashSet::new();
        let mut updated = 0;
        for candidate in candidates {
            match entries.iter_mut().find(|e| e.key == candidate.key()) {
                Some(entry) => {
                    if entry.absorb(&candidate) {
                        updated += 1;
                    }
                }
                None => {
                    fresh_keys.insert(candidate.key());
                    entries.push(QueueEntry::from_candidate(candidate));
                }
            }
        }

        apply_retention(&mut entries, opts);
        // Candidates that retention drops straight away were never in the queue
        let inserted = entries
            .iter()
            .filter(|e| fresh_keys.contains(&e.key))
            .count();
        let pruned = existing - (entries.len() - inserted);
        self.save(&entries).await?;

        debug!(
            "Scanned {} records into {} candidates",
            records.len(),
            collected
        );
        info!(
            "Incident sync: {} inserted, {} updated, {} pruned, {} total",
            inserted,
            updated,
            pruned,
            entries.len()
        );

        Ok(SyncReport {
            collected,
            inserted,
            updated,
            pruned,
            queue_total: entries.len(),
            queue_path: self.path.clone(),
            collectors,
        })
    }
}

fn sort_entries(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Drop expired entries, then cap the queue
fn apply_retention(entries: &mut Vec<QueueEntry>, opts: &SyncOptions) {
    if opts.max_age > TimeDelta::zero() {
        let cutoff = opts.now - opts.max_age;
        entries.retain(|e| e.last_seen >= cutoff);
    }
    sort_entries(entries);
    if opts.max_entries > 0 {
        entries.truncate(opts.max_entries);
    }
}
