use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 1/5/15 minute load averages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuStats {
    pub percent_total: f64,
    pub percent_per_cpu: Vec<f64>,
    pub cores_logical: usize,
    pub cores_physical: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

/// Cumulative network counters across all interfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
}

/// Byte rates derived from the previous sample. Absent on the first sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetRates {
    pub tx_bps: f64,
    pub rx_bps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetStats {
    pub total: NetCounters,
    pub total_rate: Option<NetRates>,
}

/// Host-side signals collected each sampler tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStats {
    pub hostname: String,
    pub uptime_s: u64,
    pub load: LoadAvg,
    pub cpu: CpuStats,
    pub mem: MemStats,
    pub swap: SwapStats,
    pub disks: BTreeMap<String, DiskUsage>,
    pub net: NetStats,
}

/// Rolling API request window aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMetricsSnapshot {
    pub window_s: u64,
    pub rps: f64,
    pub inflight: i64,
    pub latency_ms_avg: f64,
    pub latency_ms_p95: f64,
    pub error_rate: f64,
    pub top_paths: Vec<(String, u64)>,
    pub top_clients: Vec<(String, u64)>,
}

/// Full health snapshot published by the sampler
///
/// `host`/`api` are `None` when that side failed to collect; the busy rating
/// treats a missing side as maximally stressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub collected_at: DateTime<Utc>,
    pub host: Option<HostStats>,
    pub api: Option<ApiMetricsSnapshot>,
    pub busy_rating: f64,
}

/// Persisted minute-aligned health sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteSample {
    pub ts: i64,
    pub busy_rating: f64,
    pub snapshot: HealthSnapshot,
}
