//! Background health sampler.
//!
//! Every tick it collects host stats, snapshots the API window, derives the
//! busy rating and caches the combined snapshot for the read path. At the
//! first tick of each new minute the snapshot is persisted and old minute
//! rows are pruned.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use workgate_config::{BusyThresholds, SamplerSettings};
use workgate_models::{HealthSnapshot, MinuteSample};
use workgate_storage::StatsStore;

use crate::api_metrics::ApiMetricsCollector;
use crate::busy::compute_busy_rating;
use crate::host::HostCollector;

pub struct HealthSampler {
    settings: SamplerSettings,
    thresholds: BusyThresholds,
    collector: Arc<ApiMetricsCollector>,
    stats: Option<StatsStore>,
    latest: RwLock<Option<HealthSnapshot>>,
}

impl HealthSampler {
    pub fn new(
        settings: SamplerSettings,
        thresholds: BusyThresholds,
        collector: Arc<ApiMetricsCollector>,
        stats: Option<StatsStore>,
    ) -> Self {
        Self {
            settings,
            thresholds,
            collector,
            stats,
            latest: RwLock::new(None),
        }
    }

    /// Latest cached snapshot. The request path reads this; it never samples.
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.latest.read().unwrap().clone()
    }

    /// Busy rating for admission. `None` until the first tick completes, and
    /// `None` again once the cached snapshot outlives the staleness horizon
    /// (the sampler stalled or stopped); admission treats both as fully busy.
    pub fn busy_rating(&self) -> Option<f64> {
        self.busy_rating_at(Utc::now())
    }

    fn busy_rating_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let latest = self.latest.read().unwrap();
        let snapshot = latest.as_ref()?;
        (now - snapshot.collected_at <= self.staleness_horizon()).then(|| snapshot.busy_rating)
    }

    /// A snapshot older than twice the API window no longer counts as a
    /// signal.
    fn staleness_horizon(&self) -> Duration {
        Duration::seconds(2 * self.collector.settings().window_s as i64)
    }

    /// Sampling loop. The current tick always completes before shutdown.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut host_collector = HostCollector::new();
        let mut last_minute: Option<i64> = None;
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.settings.interval_s));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut host_collector, &mut last_minute).await;
                }
                _ = token.cancelled() => {
                    info!("health sampler stopping");
                    break;
                }
            }
        }
    }

    /// One sampling pass, also exposed for tests driving the sampler by hand.
    pub async fn tick(&self, host_collector: &mut HostCollector, last_minute: &mut Option<i64>) {
        let now = Utc::now();
        let host = Some(host_collector.collect(now));
        let api = Some(self.collector.snapshot(now));
        let busy_rating = compute_busy_rating(host.as_ref(), api.as_ref(), &self.thresholds);

        let snapshot = HealthSnapshot {
            collected_at: now,
            host,
            api,
            busy_rating,
        };
        *self.latest.write().unwrap() = Some(snapshot.clone());

        let minute = now.timestamp().div_euclid(60);
        match last_minute {
            None => *last_minute = Some(minute),
            Some(prev) if minute > *prev => {
                *last_minute = Some(minute);
                self.persist_minute(minute * 60, &snapshot).await;
            }
            Some(_) => {}
        }
    }

    async fn persist_minute(&self, ts: i64, snapshot: &HealthSnapshot) {
        let Some(stats) = &self.stats else { return };

        let sample = MinuteSample {
            ts,
            busy_rating: snapshot.busy_rating,
            snapshot: snapshot.clone(),
        };
        if let Err(err) = stats.insert_minute(&sample).await {
            warn!(error = %err, ts, "failed to persist minute sample");
            return;
        }
        let retention_s = (self.settings.minute_retention_hours * 3600) as i64;
        if let Err(err) = stats.prune_older_than(ts, retention_s).await {
            warn!(error = %err, "failed to prune minute samples");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workgate_config::ApiMetricsSettings;
    use workgate_storage::connect_sqlite;

    fn sampler(stats: Option<StatsStore>) -> Arc<HealthSampler> {
        Arc::new(HealthSampler::new(
            SamplerSettings::default(),
            BusyThresholds::default(),
            Arc::new(ApiMetricsCollector::new(ApiMetricsSettings::default())),
            stats,
        ))
    }

    #[tokio::test]
    async fn tick_publishes_snapshot() {
        let sampler = sampler(None);
        assert!(sampler.latest().is_none());
        assert!(sampler.busy_rating().is_none());

        let mut host = HostCollector::new();
        let mut last_minute = None;
        sampler.tick(&mut host, &mut last_minute).await;

        let snapshot = sampler.latest().expect("snapshot cached");
        assert!((0.0..=10.0).contains(&snapshot.busy_rating));
        assert!(snapshot.host.is_some());
        assert!(snapshot.api.is_some());
        assert!(last_minute.is_some());
    }

    #[tokio::test]
    async fn stale_snapshot_reports_no_signal() {
        let sampler = sampler(None);
        let mut host = HostCollector::new();
        let mut last_minute = None;
        sampler.tick(&mut host, &mut last_minute).await;

        let now = Utc::now();
        assert!(sampler.busy_rating_at(now).is_some());

        // Window defaults to 60s: past the 2x horizon the cached rating no
        // longer counts, so admission falls back to fully busy.
        assert!(sampler.busy_rating_at(now + Duration::seconds(121)).is_none());
    }

    #[tokio::test]
    async fn minute_rollover_persists_sample() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = connect_sqlite(&dir.path().join("stats.sqlite3")).await.unwrap();
        let stats = StatsStore::new(pool).await.unwrap();
        let sampler = sampler(Some(stats.clone()));

        let mut host = HostCollector::new();
        // Pretend the previous tick happened a minute ago.
        let mut last_minute = Some(Utc::now().timestamp().div_euclid(60) - 1);
        sampler.tick(&mut host, &mut last_minute).await;

        let rows = stats.last_n(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0 % 60, 0);
    }

    #[tokio::test]
    async fn same_minute_does_not_duplicate() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = connect_sqlite(&dir.path().join("stats.sqlite3")).await.unwrap();
        let stats = StatsStore::new(pool).await.unwrap();
        let sampler = sampler(Some(stats.clone()));

        let mut host = HostCollector::new();
        let mut last_minute = Some(Utc::now().timestamp().div_euclid(60));
        sampler.tick(&mut host, &mut last_minute).await;
        sampler.tick(&mut host, &mut last_minute).await;

        assert!(stats.last_n(10).await.unwrap().is_empty());
    }
}
