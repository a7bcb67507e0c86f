//! Minute-aligned health sample store.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use workgate_models::MinuteSample;

/// Database row for the `stats_minute` table
#[derive(Debug, sqlx::FromRow)]
struct MinuteRow {
    ts: i64,
    busy: f64,
}

#[derive(Clone)]
pub struct StatsStore {
    pool: SqlitePool,
}

impl StatsStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stats_minute (
              ts INTEGER PRIMARY KEY,
              busy REAL NOT NULL,
              snapshot_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert (or replace) the sample for a minute-aligned timestamp.
    pub async fn insert_minute(&self, sample: &MinuteSample) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO stats_minute (ts, busy, snapshot_json) VALUES (?, ?, ?)")
            .bind(sample.ts)
            .bind(sample.busy_rating)
            .bind(serde_json::to_string(&sample.snapshot)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete samples older than `seconds` before `now_ts`.
    pub async fn prune_older_than(&self, now_ts: i64, seconds: i64) -> Result<u64> {
        let cutoff = now_ts - seconds;
        let deleted = sqlx::query("DELETE FROM stats_minute WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            debug!(deleted, "pruned minute samples");
        }
        Ok(deleted)
    }

    /// Last `n` samples as `(ts, busy)`, oldest first.
    pub async fn last_n(&self, n: i64) -> Result<Vec<(i64, f64)>> {
        let rows = sqlx::query_as::<_, MinuteRow>(
            "SELECT ts, busy FROM stats_minute ORDER BY ts DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<(i64, f64)> = rows.into_iter().map(|r| (r.ts, r.busy)).collect();
        out.reverse();
        Ok(out)
    }

    /// Average busy rating at or after `since_ts`.
    pub async fn avg_since(&self, since_ts: i64) -> Result<f64> {
        let avg = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(busy) FROM stats_minute WHERE ts >= ?",
        )
        .bind(since_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(avg.unwrap_or(0.0))
    }
}
