//! In-memory job and lease tables.
//!
//! Single-owner: the engine wraps this in one mutex and is the only writer.
//! Everything here is plain data manipulation with no I/O.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use workgate_models::{Id, Job, JobPriority, Lease};

#[derive(Debug, Default)]
struct PriorityQueues {
    high: VecDeque<Id>,
    normal: VecDeque<Id>,
    low: VecDeque<Id>,
    background: VecDeque<Id>,
}

impl PriorityQueues {
    fn bucket(&mut self, priority: JobPriority) -> &mut VecDeque<Id> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Normal => &mut self.normal,
            JobPriority::Low => &mut self.low,
            JobPriority::Background => &mut self.background,
        }
    }

    fn len(&self, priority: JobPriority) -> usize {
        match priority {
            JobPriority::High => self.high.len(),
            JobPriority::Normal => self.normal.len(),
            JobPriority::Low => self.low.len(),
            JobPriority::Background => self.background.len(),
        }
    }
}

/// In-memory scheduler state: jobs, leases, indexes, priority FIFO queues.
#[derive(Debug, Default)]
pub struct JobStore {
    pub jobs: HashMap<Id, Job>,
    pub leases: HashMap<Id, Lease>,
    idempotency: HashMap<String, Id>,
    worker_leases: HashMap<String, HashSet<Id>>,
    queues: PriorityQueues,
    queued_ids: HashSet<Id>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live job by idempotency key.
    pub fn job_for_key(&self, key: &str) -> Option<&Job> {
        self.idempotency.get(key).and_then(|id| self.jobs.get(id))
    }

    /// Insert a freshly submitted job and enqueue it.
    pub fn insert_queued(&mut self, job: Job) {
        if let Some(key) = &job.idempotency_key {
            self.idempotency.insert(key.clone(), job.job_id.clone());
        }
        self.enqueue(job.job_id.clone(), job.priority);
        self.jobs.insert(job.job_id.clone(), job);
    }

    fn enqueue(&mut self, job_id: Id, priority: JobPriority) {
        if !self.queued_ids.insert(job_id.clone()) {
            return;
        }
        self.queues.bucket(priority).push_back(job_id);
    }

    /// Return a skipped candidate to the head of its class.
    pub fn requeue_front(&mut self, job_id: Id, priority: JobPriority) {
        if !self.queued_ids.insert(job_id.clone()) {
            return;
        }
        self.queues.bucket(priority).push_front(job_id);
    }

    /// Pop the oldest queued id of a class, skipping stale entries whose job
    /// is gone or no longer queued.
    pub fn pop_candidate(&mut self, priority: JobPriority) -> Option<Id> {
        loop {
            let job_id = self.queues.bucket(priority).pop_front()?;
            self.queued_ids.remove(&job_id);
            match self.jobs.get(&job_id) {
                Some(job) if job.state == workgate_models::JobState::Queued => return Some(job_id),
                _ => continue,
            }
        }
    }

    pub fn queue_depths(&self) -> BTreeMap<String, usize> {
        JobPriority::ORDERED
            .iter()
            .map(|p| (p.as_str().to_string(), self.queues.len(*p)))
            .collect()
    }

    pub fn insert_lease(&mut self, lease: Lease) {
        self.worker_leases
            .entry(lease.worker_id.clone())
            .or_default()
            .insert(lease.lease_id.clone());
        self.leases.insert(lease.lease_id.clone(), lease);
    }

    pub fn remove_lease(&mut self, lease_id: &str) -> Option<Lease> {
        let lease = self.leases.remove(lease_id)?;
        if let Some(held) = self.worker_leases.get_mut(&lease.worker_id) {
            held.remove(lease_id);
            if held.is_empty() {
                self.worker_leases.remove(&lease.worker_id);
            }
        }
        Some(lease)
    }

    /// Does this worker currently hold any active lease?
    pub fn worker_holds_lease(&self, worker_id: &str) -> bool {
        self.worker_leases
            .get(worker_id)
            .map(|held| !held.is_empty())
            .unwrap_or(false)
    }

    /// Capacity units held by all active leases.
    pub fn leased_units(&self) -> u32 {
        self.leases.values().map(|l| l.capacity_units).sum()
    }

    /// Drop terminal jobs past the retention window or beyond the cap,
    /// oldest first. Evicted jobs release their idempotency keys; the
    /// durable history remains the source of truth.
    pub fn evict_terminal(&mut self, now: DateTime<Utc>, retention_s: u64, cap: usize) -> usize {
        let mut terminal: Vec<(DateTime<Utc>, Id)> = self
            .jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| (j.finished_at.unwrap_or(j.updated_at), j.job_id.clone()))
            .collect();
        terminal.sort();

        let cutoff = now - chrono::Duration::seconds(retention_s as i64);
        let overflow = terminal.len().saturating_sub(cap);

        let evict: Vec<Id> = terminal
            .iter()
            .enumerate()
            .filter(|(i, (at, _))| *i < overflow || *at < cutoff)
            .map(|(_, (_, id))| id.clone())
            .collect();

        for job_id in &evict {
            if let Some(job) = self.jobs.remove(job_id) {
                if let Some(key) = &job.idempotency_key {
                    if self.idempotency.get(key) == Some(job_id) {
                        self.idempotency.remove(key);
                    }
                }
            }
        }
        evict.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workgate_models::{JobState, new_id};

    fn job(priority: JobPriority, key: Option<&str>) -> Job {
        let now = Utc::now();
        Job {
            job_id: new_id(),
            addon_id: "test".to_string(),
            job_type: "generic".to_string(),
            priority,
            requested_units: 1,
            unique: false,
            idempotency_key: key.map(|k| k.to_string()),
            state: JobState::Queued,
            payload: json!({}),
            tags: vec![],
            max_runtime_s: None,
            lease_id: None,
            created_at: now,
            updated_at: now,
            leased_at: None,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    #[test]
    fn fifo_within_class() {
        let mut store = JobStore::new();
        let first = job(JobPriority::Normal, None);
        let second = job(JobPriority::Normal, None);
        let (a, b) = (first.job_id.clone(), second.job_id.clone());
        store.insert_queued(first);
        store.insert_queued(second);

        assert_eq!(store.pop_candidate(JobPriority::Normal), Some(a));
        assert_eq!(store.pop_candidate(JobPriority::Normal), Some(b));
        assert_eq!(store.pop_candidate(JobPriority::Normal), None);
    }

    #[test]
    fn requeue_front_preserves_head_position() {
        let mut store = JobStore::new();
        let first = job(JobPriority::High, None);
        let second = job(JobPriority::High, None);
        let (a, b) = (first.job_id.clone(), second.job_id.clone());
        store.insert_queued(first);
        store.insert_queued(second);

        let head = store.pop_candidate(JobPriority::High).unwrap();
        assert_eq!(head, a);
        store.requeue_front(head, JobPriority::High);

        assert_eq!(store.pop_candidate(JobPriority::High), Some(a));
        assert_eq!(store.pop_candidate(JobPriority::High), Some(b));
    }

    #[test]
    fn pop_skips_non_queued_entries() {
        let mut store = JobStore::new();
        let stale = job(JobPriority::Low, None);
        let live = job(JobPriority::Low, None);
        let (a, b) = (stale.job_id.clone(), live.job_id.clone());
        store.insert_queued(stale);
        store.insert_queued(live);
        store.jobs.get_mut(&a).unwrap().state = JobState::Failed;

        assert_eq!(store.pop_candidate(JobPriority::Low), Some(b));
    }

    #[test]
    fn eviction_releases_idempotency_keys() {
        let mut store = JobStore::new();
        let mut done = job(JobPriority::Normal, Some("k1"));
        done.state = JobState::Completed;
        let old = Utc::now() - chrono::Duration::hours(2);
        done.updated_at = old;
        done.finished_at = Some(old);
        let id = done.job_id.clone();
        store.jobs.insert(id.clone(), done.clone());
        store.idempotency.insert("k1".to_string(), id.clone());

        let evicted = store.evict_terminal(Utc::now(), 3600, 5000);
        assert_eq!(evicted, 1);
        assert!(store.jobs.is_empty());
        assert!(store.job_for_key("k1").is_none());
    }

    #[test]
    fn eviction_cap_drops_oldest_first() {
        let mut store = JobStore::new();
        let now = Utc::now();
        let mut ids = vec![];
        for i in 0..4 {
            let mut j = job(JobPriority::Normal, None);
            j.state = JobState::Completed;
            let at = now - chrono::Duration::seconds(40 - i * 10);
            j.updated_at = at;
            j.finished_at = Some(at);
            ids.push(j.job_id.clone());
            store.jobs.insert(j.job_id.clone(), j);
        }

        store.evict_terminal(now, 3600, 2);
        assert!(!store.jobs.contains_key(&ids[0]));
        assert!(!store.jobs.contains_key(&ids[1]));
        assert!(store.jobs.contains_key(&ids[2]));
        assert!(store.jobs.contains_key(&ids[3]));
    }

    #[test]
    fn worker_index_tracks_leases() {
        let mut store = JobStore::new();
        let now = Utc::now();
        let lease = Lease {
            lease_id: new_id(),
            job_id: new_id(),
            worker_id: "w1".to_string(),
            capacity_units: 10,
            issued_at: now,
            expires_at: now,
            last_heartbeat: now,
        };
        let lease_id = lease.lease_id.clone();
        store.insert_lease(lease);

        assert!(store.worker_holds_lease("w1"));
        assert_eq!(store.leased_units(), 10);

        store.remove_lease(&lease_id);
        assert!(!store.worker_holds_lease("w1"));
        assert_eq!(store.leased_units(), 0);
    }
}
