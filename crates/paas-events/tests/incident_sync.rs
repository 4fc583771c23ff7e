use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use paas_core::StateRoot;
use paas_events::{
    EventLog, EventRecord, EventStream, IncidentCategory, IncidentQueue, SyncOptions,
};
use tempfile::TempDir;

fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, minute, second).unwrap()
}

fn sync_options(now: DateTime<Utc>) -> SyncOptions {
    SyncOptions {
        limit: 20,
        max_entries: 1000,
        max_age: TimeDelta::hours(24),
        window: TimeDelta::minutes(5),
        now,
    }
}

fn setup(temp_dir: &TempDir) -> (EventLog, IncidentQueue) {
    let ctx = StateRoot::new(temp_dir.path()).context("default").unwrap();
    (EventLog::new(&ctx), IncidentQueue::new(&ctx))
}

async fn deploy_failed(log: &EventLog, ts: DateTime<Utc>) {
    log.append_at(
        EventStream::Deployments,
        EventRecord::new("deploy", "deploy apply", "failed", "compose up failed")
            .with_target("edge-a"),
        ts,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_two_failures_in_one_window_make_one_incident() {
    let temp_dir = TempDir::new().unwrap();
    let (log, queue) = setup(&temp_dir);

    deploy_failed(&log, at(0, 30)).await;
    deploy_failed(&log, at(2, 30)).await;

    let report = queue.sync(&sync_options(at(3, 0))).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.queue_total, 1);
    assert_eq!(report.collectors.len(), 3);
    assert_eq!(report.queue_path, queue.path());

    let entries = queue.load().await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.incident.category, IncidentCategory::Deploy);
    assert_eq!(entry.seen_count, 2);
    assert!(entry.last_seen >= entry.first_seen);
    assert_eq!(entry.incident.target, "edge-a");
}

#[tokio::test]
async fn test_resync_without_new_events_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let (log, queue) = setup(&temp_dir);

    deploy_failed(&log, at(0, 30)).await;
    deploy_failed(&log, at(2, 30)).await;
    queue.sync(&sync_options(at(3, 0))).await.unwrap();
    let before = std::fs::read_to_string(queue.path()).unwrap();

    let report = queue.sync(&sync_options(at(4, 0))).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.pruned, 0);

    let after = std::fs::read_to_string(queue.path()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_successes_never_become_incidents() {
    let temp_dir = TempDir::new().unwrap();
    let (log, queue) = setup(&temp_dir);

    log.append_at(
        EventStream::Deployments,
        EventRecord::new("deploy", "deploy apply", "succeeded", "ok").with_target("edge-a"),
        at(1, 0),
    )
    .await
    .unwrap();

    let report = queue.sync(&sync_options(at(2, 0))).await.unwrap();
    assert_eq!(report.collected, 0);
    assert_eq!(report.queue_total, 0);
}

#[tokio::test]
async fn test_new_window_opens_new_entry() {
    let temp_dir = TempDir::new().unwrap();
    let (log, queue) = setup(&temp_dir);

    deploy_failed(&log, at(1, 0)).await;
    deploy_failed(&log, at(6, 0)).await;

    let report = queue.sync(&sync_options(at(7, 0))).await.unwrap();
    assert_eq!(report.inserted, 2);

    let entries = queue.load().await.unwrap();
    assert_eq!(entries[0].incident.window_start, "2026-05-04T09:05:00Z");
    assert_eq!(entries[1].incident.window_start, "2026-05-04T09:00:00Z");
    assert_eq!(entries[0].incident.dedupe_key, entries[1].incident.dedupe_key);
}

#[tokio::test]
async fn test_sensitive_event_fields_are_redacted_in_queue() {
    let temp_dir = TempDir::new().unwrap();
    let (log, queue) = setup(&temp_dir);

    for (minute, token) in [(0, "first-secret"), (2, "second-secret")] {
        log.append_at(
            EventStream::Deployments,
            EventRecord::new("deploy", "deploy apply", "failed", "compose up failed")
                .with_target("edge-a")
                .with_field("api_token", token)
                .with_field("release_id", "rel-1"),
            at(minute, 0),
        )
        .await
        .unwrap();
        queue.sync(&sync_options(at(minute, 30))).await.unwrap();

        let entries = queue.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        let metadata = &entries[0].incident.metadata;
        assert_eq!(metadata["api_token"], "<redacted>");
        assert_eq!(metadata["release_id"], "rel-1");
        assert_eq!(metadata["status"], "failed");
    }

    let raw = std::fs::read_to_string(queue.path()).unwrap();
    assert!(!raw.contains("first-secret"));
    assert!(!raw.contains("second-secret"));
}
