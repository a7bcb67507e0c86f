use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use workgate_models::{
    AuditEvent, HealthSnapshot, JobHistoryRecord, JobPriority, JobState, MinuteSample,
};
use workgate_storage::{connect_sqlite, HistoryStore, SettingsStore, StatsStore};

fn sample(ts: i64, busy: f64) -> MinuteSample {
    MinuteSample {
        ts,
        busy_rating: busy,
        snapshot: HealthSnapshot {
            collected_at: Utc::now(),
            host: None,
            api: None,
            busy_rating: busy,
        },
    }
}

fn record(job_id: &str, addon_id: &str, state: JobState) -> JobHistoryRecord {
    let now = Utc::now();
    JobHistoryRecord {
        job_id: job_id.to_string(),
        addon_id: addon_id.to_string(),
        job_type: "generic".to_string(),
        priority: JobPriority::Normal,
        requested_units: 5,
        unique: false,
        state,
        tags: vec!["nightly".to_string()],
        idempotency_key: None,
        lease_id: Some("l-1".to_string()),
        worker_id: Some("w-1".to_string()),
        created_at: now - Duration::seconds(30),
        updated_at: now,
        leased_at: Some(now - Duration::seconds(20)),
        started_at: Some(now - Duration::seconds(19)),
        finished_at: state.is_terminal().then_some(now),
        queue_wait_s: Some(10.0),
        runtime_s: state.is_terminal().then_some(20.0),
        error: None,
        result: Some(json!({"ok": true})),
    }
}

#[tokio::test]
async fn minute_samples_roundtrip_and_prune() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("stats.sqlite3")).await.unwrap();
    let store = StatsStore::new(pool).await.unwrap();

    let base = 1_700_000_040i64;
    for i in 0..5 {
        store.insert_minute(&sample(base + i * 60, i as f64)).await.unwrap();
    }

    let rows = store.last_n(10).await.unwrap();
    assert_eq!(rows.len(), 5);
    // Oldest first, strictly increasing minute-aligned keys.
    assert!(rows.windows(2).all(|w| w[1].0 - w[0].0 == 60));

    // Keep only the last two minutes.
    let now_ts = base + 4 * 60;
    store.prune_older_than(now_ts, 120).await.unwrap();
    let rows = store.last_n(10).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].0, base + 2 * 60);

    let avg = store.avg_since(base + 2 * 60).await.unwrap();
    assert!((avg - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn insert_minute_replaces_same_key() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("stats.sqlite3")).await.unwrap();
    let store = StatsStore::new(pool).await.unwrap();

    store.insert_minute(&sample(60, 1.0)).await.unwrap();
    store.insert_minute(&sample(60, 7.0)).await.unwrap();

    let rows = store.last_n(10).await.unwrap();
    assert_eq!(rows, vec![(60, 7.0)]);
}

#[tokio::test]
async fn history_stats_aggregate_per_addon() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("history.sqlite3")).await.unwrap();
    let store = HistoryStore::new(pool).await.unwrap();

    store.upsert_job(&record("j1", "indexer", JobState::Completed)).await.unwrap();
    store.upsert_job(&record("j2", "indexer", JobState::Failed)).await.unwrap();
    store.upsert_job(&record("j3", "thumbs", JobState::Completed)).await.unwrap();

    let stats = store.stats(30, Utc::now()).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.totals_by_state["completed"], 2);
    assert_eq!(stats.totals_by_state["failed"], 1);
    assert!((stats.success_rate.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    assert!((stats.avg_queue_wait_s.unwrap() - 10.0).abs() < 1e-9);

    assert_eq!(stats.addons.len(), 2);
    let indexer = stats.addons.iter().find(|a| a.addon_id == "indexer").unwrap();
    assert_eq!(indexer.count, 2);
    assert_eq!(indexer.states["completed"], 1);
    assert!((indexer.avg_runtime_s.unwrap() - 20.0).abs() < 1e-9);
    assert!((indexer.p95_runtime_s.unwrap() - 20.0).abs() < 1e-9);
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.sqlite3");

    {
        let pool = connect_sqlite(&path).await.unwrap();
        let store = HistoryStore::new(pool).await.unwrap();
        store.upsert_job(&record("j1", "indexer", JobState::Completed)).await.unwrap();
    }

    let pool = connect_sqlite(&path).await.unwrap();
    let store = HistoryStore::new(pool).await.unwrap();
    let stats = store.stats(30, Utc::now()).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.totals_by_state["completed"], 1);
}

#[tokio::test]
async fn upsert_preserves_lifecycle_timestamps() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("history.sqlite3")).await.unwrap();
    let store = HistoryStore::new(pool).await.unwrap();

    let leased = record("j1", "indexer", JobState::Leased);
    let original_leased_at = leased.leased_at;
    store.upsert_job(&leased).await.unwrap();

    // A later terminal row with no leased_at must not erase the earlier one.
    let mut done = record("j1", "indexer", JobState::Completed);
    done.leased_at = None;
    done.queue_wait_s = None;
    store.upsert_job(&done).await.unwrap();

    #[derive(sqlx::FromRow)]
    struct Row {
        state: String,
        leased_at: Option<chrono::DateTime<Utc>>,
        queue_wait_s: Option<f64>,
    }
    let row = sqlx::query_as::<_, Row>(
        "SELECT state, leased_at, queue_wait_s FROM job_history WHERE job_id = 'j1'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();

    assert_eq!(row.state, "completed");
    assert_eq!(
        row.leased_at.map(|t| t.timestamp()),
        original_leased_at.map(|t| t.timestamp())
    );
    assert_eq!(row.queue_wait_s, Some(10.0));
}

#[tokio::test]
async fn cleanup_prunes_old_rows() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("history.sqlite3")).await.unwrap();
    let store = HistoryStore::new(pool).await.unwrap();

    let mut old = record("j-old", "indexer", JobState::Completed);
    let long_ago = Utc::now() - Duration::days(45);
    old.updated_at = long_ago;
    old.finished_at = Some(long_ago);
    store.upsert_job(&old).await.unwrap();
    store.upsert_job(&record("j-new", "indexer", JobState::Completed)).await.unwrap();

    let deleted = store.cleanup(30, Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);

    let stats = store.stats(60, Utc::now()).await.unwrap();
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn audit_events_append() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("history.sqlite3")).await.unwrap();
    let store = HistoryStore::new(pool).await.unwrap();

    for event_type in ["LEASE_GRANTED", "LEASE_RELEASED"] {
        store
            .append_event(&AuditEvent {
                ts: Utc::now(),
                entity_kind: "lease".to_string(),
                entity_id: "l-1".to_string(),
                event_type: event_type.to_string(),
                data: json!({"worker_id": "w-1"}),
            })
            .await
            .unwrap();
    }

    assert_eq!(store.event_count("l-1").await.unwrap(), 2);
}

#[tokio::test]
async fn settings_roundtrip() {
    let dir = TempDir::new().unwrap();
    let pool = connect_sqlite(&dir.path().join("history.sqlite3")).await.unwrap();
    let store = SettingsStore::new(pool).await.unwrap();

    assert!(store.get("app_name").await.unwrap().is_none());

    store.set("app_name", &json!("workgate")).await.unwrap();
    store.set("maintenance", &json!({"enabled": false})).await.unwrap();
    store.set("app_name", &json!("workgate-prod")).await.unwrap();

    assert_eq!(store.get("app_name").await.unwrap(), Some(json!("workgate-prod")));
    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["maintenance"], json!({"enabled": false}));
}
