//! Rolling in-memory window of API request events.
//!
//! Producers are request handlers (many), the reader is the sampler (one).
//! `begin`/`end` touch a single atomic; `record` takes a short lock to
//! append and eject expired events. Restart resets the window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use workgate_config::ApiMetricsSettings;
use workgate_models::ApiMetricsSnapshot;

/// One observed request
#[derive(Debug, Clone)]
pub struct ApiEvent {
    pub at: DateTime<Utc>,
    pub path: String,
    pub client: String,
    pub status: u16,
    pub duration_ms: f64,
}

pub struct ApiMetricsCollector {
    settings: ApiMetricsSettings,
    events: Mutex<VecDeque<ApiEvent>>,
    inflight: AtomicI64,
}

impl ApiMetricsCollector {
    pub fn new(settings: ApiMetricsSettings) -> Self {
        Self {
            settings,
            events: Mutex::new(VecDeque::new()),
            inflight: AtomicI64::new(0),
        }
    }

    pub fn settings(&self) -> &ApiMetricsSettings {
        &self.settings
    }

    /// Should a request to this path be excluded from the window?
    pub fn is_excluded(&self, path: &str) -> bool {
        self.settings
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn begin(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end(&self) {
        // Never goes negative even if end() is called without begin().
        let _ = self
            .inflight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some((v - 1).max(0)));
    }

    pub fn record(&self, event: ApiEvent) {
        let cutoff = event.at - Duration::seconds(self.settings.window_s as i64);
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.settings.max_events {
            events.pop_front();
        }
        events.push_back(event);
        while events.front().map(|e| e.at < cutoff).unwrap_or(false) {
            events.pop_front();
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ApiMetricsSnapshot {
        let window_s = self.settings.window_s;
        let cutoff = now - Duration::seconds(window_s as i64);

        let (count, latencies, errors, paths, clients) = {
            let mut events = self.events.lock().unwrap();
            while events.front().map(|e| e.at < cutoff).unwrap_or(false) {
                events.pop_front();
            }

            let mut latencies: Vec<f64> = Vec::with_capacity(events.len());
            let mut errors = 0u64;
            let mut paths: HashMap<String, u64> = HashMap::new();
            let mut clients: HashMap<String, u64> = HashMap::new();
            for event in events.iter() {
                latencies.push(event.duration_ms);
                if event.status >= 400 {
                    errors += 1;
                }
                *paths.entry(event.path.clone()).or_default() += 1;
                *clients.entry(event.client.clone()).or_default() += 1;
            }
            (events.len() as u64, latencies, errors, paths, clients)
        };

        let rps = if window_s > 0 {
            count as f64 / window_s as f64
        } else {
            0.0
        };
        let latency_ms_avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        ApiMetricsSnapshot {
            window_s,
            rps,
            inflight: self.inflight.load(Ordering::Relaxed),
            latency_ms_avg,
            latency_ms_p95: p95(latencies),
            error_rate: if count > 0 { errors as f64 / count as f64 } else { 0.0 },
            top_paths: top_n(paths, self.settings.top_n),
            top_clients: top_n(clients, self.settings.top_n),
        }
    }
}

/// p95 of a sample set; ties break to the lower index.
fn p95(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = (0.95 * (values.len() - 1) as f64).round() as usize;
    values[k]
}

/// Descending by count, ties lexicographic by key.
fn top_n(counts: HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}
