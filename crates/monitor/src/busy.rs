//! Busy rating: one 0..=10 score summarizing host and API pressure.
//!
//! Each signal maps through a monotonic piecewise-linear ramp; the composite
//! is the maximum across signals so a single stressed signal dominates.
//! Missing inputs contribute the maximum (fail-closed): with no data the
//! scheduler must not admit heavy work.

use workgate_config::BusyThresholds;
use workgate_models::{ApiMetricsSnapshot, HostStats};

/// Map `x` onto 0..=10: 0 at or below `lo`, 10 at or above `hi`, linear
/// in between.
fn ramp(x: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    (((x - lo) / (hi - lo)) * 10.0).clamp(0.0, 10.0)
}

pub fn compute_busy_rating(
    host: Option<&HostStats>,
    api: Option<&ApiMetricsSnapshot>,
    thresholds: &BusyThresholds,
) -> f64 {
    let mut signals: Vec<f64> = Vec::with_capacity(7);

    match host {
        Some(host) => {
            let cores = host.cpu.cores_logical.max(1) as f64;
            signals.push(ramp(host.cpu.percent_total / 100.0, thresholds.cpu_frac));
            signals.push(ramp(host.mem.percent / 100.0, thresholds.mem_frac));
            signals.push(ramp(host.load.load1 / cores, thresholds.load_per_core));
        }
        None => signals.extend([10.0; 3]),
    }

    match api {
        Some(api) => {
            signals.push(ramp(api.latency_ms_p95, thresholds.p95_ms));
            signals.push(ramp(api.inflight as f64, thresholds.inflight));
            signals.push(ramp(api.error_rate, thresholds.error_rate));
            signals.push(ramp(api.rps, thresholds.rps));
        }
        None => signals.extend([10.0; 4]),
    }

    signals
        .into_iter()
        .fold(0.0f64, f64::max)
        .clamp(0.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workgate_models::{CpuStats, LoadAvg, MemStats, NetCounters, NetStats, SwapStats};

    fn host(cpu_pct: f64, mem_pct: f64, load1: f64, cores: usize) -> HostStats {
        HostStats {
            hostname: "test".to_string(),
            uptime_s: 100,
            load: LoadAvg {
                load1,
                load5: load1,
                load15: load1,
            },
            cpu: CpuStats {
                percent_total: cpu_pct,
                percent_per_cpu: vec![cpu_pct; cores],
                cores_logical: cores,
                cores_physical: Some(cores),
            },
            mem: MemStats {
                total: 100,
                available: 50,
                used: 50,
                free: 50,
                percent: mem_pct,
            },
            swap: SwapStats {
                total: 0,
                used: 0,
                free: 0,
                percent: 0.0,
            },
            disks: Default::default(),
            net: NetStats {
                total: NetCounters {
                    bytes_sent: 0,
                    bytes_recv: 0,
                    packets_sent: 0,
                    packets_recv: 0,
                    errin: 0,
                    errout: 0,
                },
                total_rate: None,
            },
        }
    }

    fn api(p95: f64, inflight: i64, error_rate: f64, rps: f64) -> ApiMetricsSnapshot {
        ApiMetricsSnapshot {
            window_s: 60,
            rps,
            inflight,
            latency_ms_avg: p95 / 2.0,
            latency_ms_p95: p95,
            error_rate,
            top_paths: vec![],
            top_clients: vec![],
        }
    }

    #[test]
    fn idle_host_scores_near_zero() {
        let h = host(5.0, 30.0, 0.1, 8);
        let a = api(20.0, 0, 0.0, 0.1);
        let busy = compute_busy_rating(Some(&h), Some(&a), &BusyThresholds::default());
        assert_eq!(busy, 0.0);
    }

    #[test]
    fn one_stressed_signal_dominates() {
        // Everything idle except CPU pegged: the max rule must report 10.
        let h = host(100.0, 30.0, 0.1, 8);
        let a = api(20.0, 0, 0.0, 0.1);
        let busy = compute_busy_rating(Some(&h), Some(&a), &BusyThresholds::default());
        assert_eq!(busy, 10.0);
    }

    #[test]
    fn missing_host_fails_closed() {
        let a = api(20.0, 0, 0.0, 0.1);
        let busy = compute_busy_rating(None, Some(&a), &BusyThresholds::default());
        assert_eq!(busy, 10.0);
    }

    #[test]
    fn missing_api_fails_closed() {
        let h = host(5.0, 30.0, 0.1, 8);
        let busy = compute_busy_rating(Some(&h), None, &BusyThresholds::default());
        assert_eq!(busy, 10.0);
    }

    #[test]
    fn ramps_are_monotonic() {
        let thresholds = BusyThresholds::default();
        let mut prev = -1.0;
        for cpu in (0..=100).step_by(5) {
            let h = host(cpu as f64, 30.0, 0.1, 8);
            let a = api(20.0, 0, 0.0, 0.1);
            let busy = compute_busy_rating(Some(&h), Some(&a), &thresholds);
            assert!(busy >= prev, "busy must not drop as cpu rises");
            prev = busy;
        }
    }

    #[test]
    fn midpoint_latency_scores_midway() {
        let h = host(5.0, 30.0, 0.1, 8);
        // p95 thresholds default to (50, 800): 425ms is the midpoint.
        let a = api(425.0, 0, 0.0, 0.1);
        let busy = compute_busy_rating(Some(&h), Some(&a), &BusyThresholds::default());
        assert!((busy - 5.0).abs() < 0.01, "got {busy}");
    }
}
