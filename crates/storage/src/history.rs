//! Durable job history and append-only audit events.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

use workgate_models::{AddonHistoryStats, AuditEvent, HistoryStats, JobHistoryRecord};

/// Database row used by the stats aggregation
#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    addon_id: String,
    state: String,
    queue_wait_s: Option<f64>,
    runtime_s: Option<f64>,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_history (
              job_id TEXT PRIMARY KEY,
              addon_id TEXT NOT NULL,
              job_type TEXT NOT NULL,
              priority TEXT NOT NULL,
              requested_units INTEGER NOT NULL,
              unique_flag INTEGER NOT NULL,
              state TEXT NOT NULL,
              tags_json TEXT NOT NULL,
              idempotency_key TEXT,
              lease_id TEXT,
              worker_id TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              leased_at TEXT,
              started_at TEXT,
              finished_at TEXT,
              queue_wait_s REAL,
              runtime_s REAL,
              error TEXT,
              result_json TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_history_updated ON job_history(updated_at)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_history_addon ON job_history(addon_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_history_state ON job_history(state)")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              ts TEXT NOT NULL,
              entity_kind TEXT NOT NULL,
              entity_id TEXT NOT NULL,
              event_type TEXT NOT NULL,
              data_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_events_entity ON job_events(entity_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert a job projection. Earlier `leased_at`/`started_at`/`finished_at`
    /// values are preserved so a late row never erases lifecycle timestamps.
    pub async fn upsert_job(&self, record: &JobHistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_history (
              job_id, addon_id, job_type, priority, requested_units, unique_flag,
              state, tags_json, idempotency_key, lease_id, worker_id,
              created_at, updated_at, leased_at, started_at, finished_at,
              queue_wait_s, runtime_s, error, result_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
              addon_id = excluded.addon_id,
              job_type = excluded.job_type,
              priority = excluded.priority,
              requested_units = excluded.requested_units,
              unique_flag = excluded.unique_flag,
              state = excluded.state,
              tags_json = excluded.tags_json,
              idempotency_key = excluded.idempotency_key,
              lease_id = COALESCE(excluded.lease_id, job_history.lease_id),
              worker_id = COALESCE(excluded.worker_id, job_history.worker_id),
              updated_at = excluded.updated_at,
              leased_at = COALESCE(job_history.leased_at, excluded.leased_at),
              started_at = COALESCE(job_history.started_at, excluded.started_at),
              finished_at = COALESCE(excluded.finished_at, job_history.finished_at),
              queue_wait_s = COALESCE(job_history.queue_wait_s, excluded.queue_wait_s),
              runtime_s = COALESCE(excluded.runtime_s, job_history.runtime_s),
              error = COALESCE(excluded.error, job_history.error),
              result_json = COALESCE(excluded.result_json, job_history.result_json)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.addon_id)
        .bind(&record.job_type)
        .bind(record.priority.as_str())
        .bind(record.requested_units as i64)
        .bind(record.unique as i64)
        .bind(record.state.as_str())
        .bind(serde_json::to_string(&record.tags)?)
        .bind(&record.idempotency_key)
        .bind(&record.lease_id)
        .bind(&record.worker_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.leased_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.queue_wait_s)
        .bind(record.runtime_s)
        .bind(&record.error)
        .bind(record.result.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_events (ts, entity_kind, entity_id, event_type, data_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.ts)
        .bind(&event.entity_kind)
        .bind(&event.entity_id)
        .bind(&event.event_type)
        .bind(event.data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggregate statistics over the trailing window.
    pub async fn stats(&self, days: i64, now: DateTime<Utc>) -> Result<HistoryStats> {
        let start = now - Duration::days(days);
        let rows = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT addon_id, state, queue_wait_s, runtime_s
            FROM job_history
            WHERE COALESCE(finished_at, updated_at) >= ?
            "#,
        )
        .bind(start)
        .fetch_all(&self.pool)
        .await?;

        let mut totals_by_state: BTreeMap<String, u64> = BTreeMap::new();
        let mut queue_waits: Vec<f64> = Vec::new();
        let mut per_addon: BTreeMap<String, (u64, BTreeMap<String, u64>, Vec<f64>, Vec<f64>)> =
            BTreeMap::new();

        for row in &rows {
            *totals_by_state.entry(row.state.clone()).or_default() += 1;

            let entry = per_addon.entry(row.addon_id.clone()).or_default();
            entry.0 += 1;
            *entry.1.entry(row.state.clone()).or_default() += 1;
            if let Some(runtime) = row.runtime_s {
                entry.2.push(runtime);
            }
            if let Some(wait) = row.queue_wait_s {
                queue_waits.push(wait);
                entry.3.push(wait);
            }
        }

        let addons = per_addon
            .into_iter()
            .map(|(addon_id, (count, states, mut runtimes, waits))| {
                runtimes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let avg_runtime_s = mean(&runtimes);
                let p95_runtime_s = if runtimes.is_empty() {
                    None
                } else {
                    let idx = ((runtimes.len() as f64 * 0.95) as usize).max(1) - 1;
                    Some(runtimes[idx])
                };
                AddonHistoryStats {
                    addon_id,
                    count,
                    states,
                    avg_runtime_s,
                    p95_runtime_s,
                    avg_queue_wait_s: mean(&waits),
                }
            })
            .collect();

        let completed = totals_by_state.get("completed").copied().unwrap_or(0);
        let failed = totals_by_state.get("failed").copied().unwrap_or(0);
        let expired = totals_by_state.get("expired").copied().unwrap_or(0);
        let finished = completed + failed + expired;
        let success_rate = (finished > 0).then(|| completed as f64 / finished as f64);

        Ok(HistoryStats {
            range_start: start,
            range_end: now,
            total: rows.len() as u64,
            totals_by_state,
            success_rate,
            avg_queue_wait_s: mean(&queue_waits),
            addons,
        })
    }

    /// Prune rows whose lifecycle ended more than `days` ago.
    pub async fn cleanup(&self, days: i64, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(days);
        let deleted = sqlx::query("DELETE FROM job_history WHERE COALESCE(finished_at, updated_at) < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            info!(deleted, days, "pruned job history");
        }
        Ok(deleted)
    }

    /// Count of audit events for an entity, used by tests and diagnostics.
    pub async fn event_count(&self, entity_id: &str) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_events WHERE entity_id = ?",
        )
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
