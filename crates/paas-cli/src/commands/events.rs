use paas_core::Result;
use paas_events::{EventFilter, EventLog, EventRecord};

use super::{parse_severity, App};
use crate::output::Outcome;
use crate::EventsCommands;

pub(crate) fn describe(record: &EventRecord) -> String {
    let target = match record.target.as_str() {
        "" => String::new(),
        t => format!(" target={}", t),
    };
    format!(
        "{} {} [{}] {} {}{}: {}",
        record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        record.source,
        record.severity,
        record.command,
        record.status,
        target,
        record.message
    )
}

pub async fn run(app: &App, action: EventsCommands) -> Result<Outcome> {
    match action {
        EventsCommands::List {
            limit,
            source,
            status,
            severity,
        } => {
            let filter = EventFilter {
                limit: Some(limit.max(1)),
                source,
                status,
                severity: severity.as_deref().map(parse_severity).transpose()?,
            };
            let records = EventLog::new(&app.ctx).list(&filter).await?;
            Outcome::live()
                .field("count", records.len())
                .rows(records.iter().map(describe).collect::<Vec<_>>())
                .data(&records)
        }
    }
}
