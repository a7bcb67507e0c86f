use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use workgate_config::AppConfig;
use workgate_monitor::{ApiMetricsCollector, HealthSampler};
use workgate_scheduler::{SchedulerEngine, SystemClock};
use workgate_storage::{connect_sqlite, HistoryStore, HistoryWriter, SettingsStore, StatsStore};

/// How many history events may queue between the scheduler and the writer.
const HISTORY_CHANNEL_CAPACITY: usize = 4096;

/// Shared application state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SchedulerEngine>,
    pub sampler: Arc<HealthSampler>,
    pub metrics: Arc<ApiMetricsCollector>,
    pub history: HistoryStore,
    pub stats: StatsStore,
    pub settings: SettingsStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire up stores, monitor, and engine. Returns the history writer so the
    /// caller decides where it runs (the server spawns it; tests may drive it
    /// inline).
    pub async fn build(config: AppConfig) -> Result<(Self, HistoryWriter)> {
        let config = Arc::new(config);

        let stats_pool = connect_sqlite(&config.storage.stats_db_path()).await?;
        let stats = StatsStore::new(stats_pool).await?;

        let history_pool = connect_sqlite(&config.storage.history_db_path()).await?;
        let history = HistoryStore::new(history_pool.clone()).await?;
        let settings = SettingsStore::new(history_pool).await?;

        let metrics = Arc::new(ApiMetricsCollector::new(config.api_metrics.clone()));
        let sampler = Arc::new(HealthSampler::new(
            config.sampler.clone(),
            config.busy.clone(),
            metrics.clone(),
            Some(stats.clone()),
        ));

        let (history_tx, history_rx) = mpsc::channel(HISTORY_CHANNEL_CAPACITY);
        let busy_source = {
            let sampler = sampler.clone();
            Arc::new(move || sampler.busy_rating())
        };
        let engine = Arc::new(SchedulerEngine::new(
            config.scheduler.clone(),
            Arc::new(SystemClock),
            busy_source,
            Some(history_tx),
        ));

        let writer = HistoryWriter::new(history.clone(), history_rx);

        Ok((
            Self {
                engine,
                sampler,
                metrics,
                history,
                stats,
                settings,
                config,
            },
            writer,
        ))
    }
}
