//! Release and event retention

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use paas_core::layout::ContextPaths;
use paas_core::types::validate_slug;
use paas_core::Result;
use paas_events::{EventLog, EventRecord, EventStream};

use crate::bundle::{list_apps, list_releases};

#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Restrict to one app; every app otherwise
    pub app: Option<String>,
    /// Newest releases kept per app
    pub keep: usize,
    /// Drop event records older than this
    pub events_max_age: Option<TimeDelta>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub apps_scanned: usize,
    pub releases_scanned: usize,
    /// `<app>/<release_id>` of every removed bundle
    pub releases_removed: Vec<String>,
    pub events_removed: usize,
}

/// Delete all but the newest `keep` releases per app, then trim event streams
///
/// One `deploy prune` record is appended to the audit stream afterwards.
pub async fn prune(ctx: &ContextPaths, opts: &PruneOptions) -> Result<PruneReport> {
    let apps = match opts.app.as_deref() {
        Some(app) => vec![validate_slug("app", app)?],
        None => list_apps(ctx).await?,
    };

    let mut report = PruneReport::default();
    for app in &apps {
        report.apps_scanned += 1;
        let releases = list_releases(ctx, app).await?;
        report.releases_scanned += releases.len();
        for release in releases.into_iter().skip(opts.keep) {
            tokio::fs::remove_dir_all(&release.dir).await?;
            report
                .releases_removed
                .push(format!("{}/{}", app, release.metadata.release_id));
        }
    }

    let log = EventLog::new(ctx);
    if let Some(max_age) = opts.events_max_age.filter(|d| *d > TimeDelta::zero()) {
        report.events_removed = log.prune_before(opts.now - max_age).await?;
    }

    info!(
        "Pruned {} releases and {} events",
        report.releases_removed.len(),
        report.events_removed
    );
    log.append(
        EventStream::Audit,
        EventRecord::new(
            "audit",
            "deploy prune",
            "succeeded",
            format!(
                "removed {} releases and {} events",
                report.releases_removed.len(),
                report.events_removed
            ),
        )
        .with_field("keep", opts.keep)
        .with_field("apps_scanned", report.apps_scanned)
        .with_field("releases_removed", report.releases_removed.len())
        .with_field("events_removed", report.events_removed),
    )
    .await?;

    Ok(report)
}
