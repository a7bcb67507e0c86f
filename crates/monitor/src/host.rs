//! Host metric collection via sysinfo.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use sysinfo::{Disks, Networks, System};

use workgate_models::{
    CpuStats, DiskUsage, HostStats, LoadAvg, MemStats, NetCounters, NetRates, NetStats, SwapStats,
};

/// Stateful collector: keeps the sysinfo handle (CPU usage needs a baseline
/// between refreshes) and the previous network counters for rate derivation.
pub struct HostCollector {
    system: System,
    last_net: Option<(DateTime<Utc>, u64, u64)>,
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCollector {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
            last_net: None,
        }
    }

    pub fn collect(&mut self, now: DateTime<Utc>) -> HostStats {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let per_cpu: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as f64)
            .collect();
        let cores_logical = per_cpu.len().max(1);
        let percent_total = if per_cpu.is_empty() {
            self.system.global_cpu_usage() as f64
        } else {
            per_cpu.iter().sum::<f64>() / per_cpu.len() as f64
        };

        let load = System::load_average();

        let mem_total = self.system.total_memory();
        let mem_used = self.system.used_memory();
        let mem = MemStats {
            total: mem_total,
            available: self.system.available_memory(),
            used: mem_used,
            free: self.system.free_memory(),
            percent: percent_of(mem_used, mem_total),
        };

        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();
        let swap = SwapStats {
            total: swap_total,
            used: swap_used,
            free: self.system.free_swap(),
            percent: percent_of(swap_used, swap_total),
        };

        HostStats {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            uptime_s: System::uptime(),
            load: LoadAvg {
                load1: load.one,
                load5: load.five,
                load15: load.fifteen,
            },
            cpu: CpuStats {
                percent_total,
                percent_per_cpu: per_cpu,
                cores_logical,
                cores_physical: self.system.physical_core_count(),
            },
            mem,
            swap,
            disks: collect_disks(),
            net: self.collect_net(now),
        }
    }

    fn collect_net(&mut self, now: DateTime<Utc>) -> NetStats {
        let networks = Networks::new_with_refreshed_list();

        let mut total = NetCounters {
            bytes_sent: 0,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
            errin: 0,
            errout: 0,
        };
        for (_name, data) in networks.iter() {
            total.bytes_sent += data.total_transmitted();
            total.bytes_recv += data.total_received();
            total.packets_sent += data.total_packets_transmitted();
            total.packets_recv += data.total_packets_received();
            total.errin += data.total_errors_on_received();
            total.errout += data.total_errors_on_transmitted();
        }

        let total_rate = self.last_net.and_then(|(last_at, last_sent, last_recv)| {
            let dt = (now - last_at).num_milliseconds() as f64 / 1000.0;
            // Too short a gap (or a clock hiccup) makes the rate meaningless.
            if dt < 0.25 {
                return None;
            }
            Some(NetRates {
                tx_bps: (total.bytes_sent.saturating_sub(last_sent)) as f64 / dt,
                rx_bps: (total.bytes_recv.saturating_sub(last_recv)) as f64 / dt,
            })
        });
        self.last_net = Some((now, total.bytes_sent, total.bytes_recv));

        NetStats { total, total_rate }
    }
}

fn collect_disks() -> BTreeMap<String, DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let mut out = BTreeMap::new();
    for disk in disks.iter() {
        let mount = disk.mount_point().to_string_lossy().to_string();
        // Skip pseudo mounts that only add noise.
        if mount.starts_with("/snap") || mount.starts_with("/var/lib/docker") {
            continue;
        }
        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        out.insert(
            mount,
            DiskUsage {
                total,
                used,
                free,
                percent: percent_of(used, total),
            },
        );
    }
    out
}

fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}
