//! Typed, defaulted, environment-overridable configuration.
//!
//! Every recognized option is an explicit field with a default; nothing is
//! passed through untyped. Malformed environment values fall back to the
//! default rather than aborting startup.

use std::env;
use std::path::PathBuf;

fn env_u32(name: &str, default: u32) -> u32 {
    env_parse(name, default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_parse(name, default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env_parse(name, default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env_parse(name, default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or(default),
        _ => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

/// HTTP server binding
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("WORKGATE_HOST", &defaults.host),
            port: env_parse("WORKGATE_PORT", defaults.port),
        }
    }
}

/// Scheduler capacity and lease timing
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub total_capacity_units: u32,
    pub reserve_units: u32,
    pub lease_ttl_s: u64,
    pub heartbeat_grace_s: u64,
    pub reaper_interval_ms: u64,
    pub retry_base_ms: u64,
    /// How long terminal jobs stay in memory before eviction.
    pub terminal_retention_s: u64,
    /// Hard cap on terminal jobs held in memory.
    pub terminal_cap: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            total_capacity_units: 100,
            reserve_units: 0,
            lease_ttl_s: 30,
            heartbeat_grace_s: 5,
            reaper_interval_ms: 1000,
            retry_base_ms: 375,
            terminal_retention_s: 3600,
            terminal_cap: 5000,
        }
    }
}

impl SchedulerSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            total_capacity_units: env_u32("WORKGATE_TOTAL_CAPACITY_UNITS", d.total_capacity_units),
            reserve_units: env_u32("WORKGATE_RESERVE_UNITS", d.reserve_units),
            lease_ttl_s: env_u64("WORKGATE_LEASE_TTL_S", d.lease_ttl_s),
            heartbeat_grace_s: env_u64("WORKGATE_HEARTBEAT_GRACE_S", d.heartbeat_grace_s),
            reaper_interval_ms: env_u64("WORKGATE_REAPER_INTERVAL_MS", d.reaper_interval_ms),
            retry_base_ms: env_u64("WORKGATE_RETRY_BASE_MS", d.retry_base_ms),
            terminal_retention_s: env_u64("WORKGATE_TERMINAL_RETENTION_S", d.terminal_retention_s),
            terminal_cap: env_usize("WORKGATE_TERMINAL_CAP", d.terminal_cap),
        }
    }
}

/// Health sampler cadence and minute-sample retention
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval_s: u64,
    pub minute_retention_hours: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval_s: 5,
            minute_retention_hours: 24,
        }
    }
}

impl SamplerSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            interval_s: env_u64("WORKGATE_SAMPLER_INTERVAL_S", d.interval_s),
            minute_retention_hours: env_u64("WORKGATE_MINUTE_RETENTION_HOURS", d.minute_retention_hours),
        }
    }
}

/// Rolling API request window
#[derive(Debug, Clone)]
pub struct ApiMetricsSettings {
    pub window_s: u64,
    pub top_n: usize,
    pub max_events: usize,
    /// Requests whose path starts with one of these are not recorded.
    pub excluded_paths: Vec<String>,
}

impl Default for ApiMetricsSettings {
    fn default() -> Self {
        Self {
            window_s: 60,
            top_n: 10,
            max_events: 50_000,
            excluded_paths: vec![
                "/system/stats".to_string(),
                "/docs".to_string(),
                "/openapi.json".to_string(),
            ],
        }
    }
}

impl ApiMetricsSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let excluded = match env::var("WORKGATE_EXCLUDED_PATHS") {
            Ok(raw) if !raw.is_empty() => raw
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => d.excluded_paths,
        };
        Self {
            window_s: env_u64("WORKGATE_API_WINDOW_S", d.window_s),
            top_n: env_usize("WORKGATE_API_TOP_N", d.top_n),
            max_events: env_usize("WORKGATE_API_MAX_EVENTS", d.max_events),
            excluded_paths: excluded,
        }
    }
}

/// Durable store locations and retention
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub history_retention_days: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            history_retention_days: 30,
        }
    }
}

impl StorageSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: PathBuf::from(env_string(
                "WORKGATE_DATA_DIR",
                &d.data_dir.to_string_lossy(),
            )),
            history_retention_days: env_u64("WORKGATE_HISTORY_RETENTION_DAYS", d.history_retention_days),
        }
    }

    pub fn stats_db_path(&self) -> PathBuf {
        self.data_dir.join("system_stats.sqlite3")
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join("scheduler_history.sqlite3")
    }
}

/// Busy-rating signal breakpoints
///
/// Each `(lo, hi)` pair is the piecewise-linear ramp for one signal: at or
/// below `lo` the signal scores 0, at or above `hi` it scores 10.
#[derive(Debug, Clone)]
pub struct BusyThresholds {
    pub cpu_frac: (f64, f64),
    pub mem_frac: (f64, f64),
    pub load_per_core: (f64, f64),
    pub p95_ms: (f64, f64),
    pub inflight: (f64, f64),
    pub error_rate: (f64, f64),
    pub rps: (f64, f64),
}

impl Default for BusyThresholds {
    fn default() -> Self {
        Self {
            cpu_frac: (0.10, 0.90),
            mem_frac: (0.50, 0.95),
            load_per_core: (0.20, 1.20),
            p95_ms: (50.0, 800.0),
            inflight: (1.0, 20.0),
            error_rate: (0.01, 0.20),
            rps: (0.5, 25.0),
        }
    }
}

impl BusyThresholds {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cpu_frac: (
                env_f64("WORKGATE_BUSY_CPU_LO", d.cpu_frac.0),
                env_f64("WORKGATE_BUSY_CPU_HI", d.cpu_frac.1),
            ),
            mem_frac: (
                env_f64("WORKGATE_BUSY_MEM_LO", d.mem_frac.0),
                env_f64("WORKGATE_BUSY_MEM_HI", d.mem_frac.1),
            ),
            load_per_core: (
                env_f64("WORKGATE_BUSY_LOAD_LO", d.load_per_core.0),
                env_f64("WORKGATE_BUSY_LOAD_HI", d.load_per_core.1),
            ),
            p95_ms: (
                env_f64("WORKGATE_BUSY_P95_LO", d.p95_ms.0),
                env_f64("WORKGATE_BUSY_P95_HI", d.p95_ms.1),
            ),
            inflight: (
                env_f64("WORKGATE_BUSY_INFLIGHT_LO", d.inflight.0),
                env_f64("WORKGATE_BUSY_INFLIGHT_HI", d.inflight.1),
            ),
            error_rate: (
                env_f64("WORKGATE_BUSY_ERR_LO", d.error_rate.0),
                env_f64("WORKGATE_BUSY_ERR_HI", d.error_rate.1),
            ),
            rps: (
                env_f64("WORKGATE_BUSY_RPS_LO", d.rps.0),
                env_f64("WORKGATE_BUSY_RPS_HI", d.rps.1),
            ),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerSettings,
    pub sampler: SamplerSettings,
    pub api_metrics: ApiMetricsSettings,
    pub storage: StorageSettings,
    pub busy: BusyThresholds,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            server: ServerConfig::from_env(),
            scheduler: SchedulerSettings::from_env(),
            sampler: SamplerSettings::from_env(),
            api_metrics: ApiMetricsSettings::from_env(),
            storage: StorageSettings::from_env(),
            busy: BusyThresholds::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.total_capacity_units == 0 {
            anyhow::bail!("total_capacity_units must be positive");
        }
        if self.scheduler.reserve_units > self.scheduler.total_capacity_units {
            anyhow::bail!("reserve_units cannot exceed total_capacity_units");
        }
        if self.sampler.interval_s == 0 {
            anyhow::bail!("sampler interval must be at least 1s");
        }
        if self.api_metrics.window_s == 0 {
            anyhow::bail!("api metrics window must be at least 1s");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn reserve_above_total_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.reserve_units = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn db_paths_live_under_data_dir() {
        let storage = StorageSettings::default();
        assert!(storage.stats_db_path().starts_with("data"));
        assert!(storage.history_db_path().starts_with("data"));
    }
}
