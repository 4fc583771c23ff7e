use paas_core::{PaasError, Result};
use paas_events::{IncidentQueue, IncidentStatus, QueueEntry, SyncOptions};

use super::App;
use crate::output::Outcome;
use crate::IncidentCommands;

fn describe(entry: &QueueEntry) -> String {
    format!(
        "{} [{}] {} {} target={} seen={} last_seen={} {}",
        entry.incident.id,
        entry.incident.severity,
        entry.status,
        entry.incident.category,
        entry.incident.target,
        entry.seen_count,
        entry.last_seen.to_rfc3339(),
        entry.incident.message
    )
}

pub async fn run(app: &App, action: IncidentCommands) -> Result<Outcome> {
    let queue = IncidentQueue::new(&app.ctx);
    match action {
        IncidentCommands::Sync { limit } => {
            let mut opts = SyncOptions::from_config(&app.config.incident);
            if let Some(limit) = limit {
                opts.limit = limit.max(1);
            }
            let report = queue.sync(&opts).await?;
            Outcome::live()
                .field("collected", report.collected)
                .field("inserted", report.inserted)
                .field("updated", report.updated)
                .field("pruned", report.pruned)
                .field("queue_total", report.queue_total)
                .field("queue_path", report.queue_path.display())
                .rows(
                    report
                        .collectors
                        .iter()
                        .map(|c| format!("{} matched={} candidates={}", c.name, c.matched, c.candidates))
                        .collect::<Vec<_>>(),
                )
                .data(&report)
        }
        IncidentCommands::List { limit } => {
            let mut entries = queue.load().await?;
            let total = entries.len();
            entries.truncate(limit.max(1));
            Outcome::live()
                .field("count", entries.len())
                .field("queue_total", total)
                .field("queue_path", queue.path().display())
                .rows(entries.iter().map(describe).collect::<Vec<_>>())
                .data(&entries)
        }
        IncidentCommands::SetStatus { id, status } => {
            let status: IncidentStatus = status.parse().map_err(PaasError::usage)?;
            let entry = queue.set_status(&id, status).await?;
            Outcome::live()
                .field("id", &entry.incident.id)
                .field("key", &entry.key)
                .field("status", entry.status)
                .data(&entry)
        }
    }
}
