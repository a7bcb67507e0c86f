//! Scheduler engine: submit / request-lease / heartbeat / complete.
//!
//! Every state mutation happens inside one mutex region that never performs
//! I/O; durable writes leave the critical section as `HistoryEvent`s on a
//! bounded channel consumed by the history writer.

use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use workgate_config::SchedulerSettings;
use workgate_models::{
    AuditEvent, CompleteStatus, HistoryEvent, Job, JobHistoryRecord, JobPriority, JobState, Lease,
    RequestLeaseRequest, RequestLeaseResponse, SchedulerError, SchedulerSnapshot, SubmitJobRequest,
    new_id,
};

use crate::capacity::{retry_after_ms, round_busy, usable_capacity_units};
use crate::clock::Clock;
use crate::store::JobStore;

/// Source of the current busy rating. `None` means no signal is available
/// and admission fails closed.
pub type BusyProvider = Arc<dyn Fn() -> Option<f64> + Send + Sync>;

pub struct SchedulerEngine {
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
    busy_provider: BusyProvider,
    store: Mutex<JobStore>,
    history_tx: Option<mpsc::Sender<HistoryEvent>>,
}

impl SchedulerEngine {
    pub fn new(
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
        busy_provider: BusyProvider,
        history_tx: Option<mpsc::Sender<HistoryEvent>>,
    ) -> Self {
        Self {
            settings,
            clock,
            busy_provider,
            store: Mutex::new(JobStore::new()),
            history_tx,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Current busy rating rounded to the capacity bucket. Missing signal is
    /// treated as fully busy.
    fn busy_bucket(&self) -> u8 {
        round_busy((self.busy_provider)().unwrap_or(10.0))
    }

    fn lease_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds((self.settings.lease_ttl_s + self.settings.heartbeat_grace_s) as i64)
    }

    fn emit(&self, event: HistoryEvent) {
        let Some(tx) = &self.history_tx else { return };
        if let Err(err) = tx.try_send(event) {
            warn!(error = %err, "failed to enqueue history event, dropping it");
        }
    }

    fn emit_audit(&self, entity_kind: &str, entity_id: &str, event_type: &str, data: serde_json::Value) {
        self.emit(HistoryEvent::Audit(AuditEvent {
            ts: self.clock.now(),
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.to_string(),
            event_type: event_type.to_string(),
            data,
        }));
    }

    fn emit_job_row(&self, job: &Job, lease: Option<&Lease>) {
        self.emit(HistoryEvent::Job(Box::new(JobHistoryRecord::project(job, lease))));
    }

    // ---------- Submit ----------

    pub async fn submit(&self, req: SubmitJobRequest) -> Result<Job, SchedulerError> {
        if req.requested_units < 1 || req.requested_units > 100 {
            return Err(SchedulerError::InvalidArguments {
                reason: format!("requested_units must be in 1..=100, got {}", req.requested_units),
            });
        }
        if req.requested_units > self.settings.total_capacity_units {
            return Err(SchedulerError::InvalidArguments {
                reason: format!(
                    "requested_units {} exceeds total capacity {}",
                    req.requested_units, self.settings.total_capacity_units
                ),
            });
        }

        let mut store = self.store.lock().await;

        if let Some(key) = req.idempotency_key.as_deref() {
            if let Some(existing) = store.job_for_key(key) {
                debug!(job_id = %existing.job_id, key, "idempotency hit, returning existing job");
                return Ok(existing.clone());
            }
        }

        let now = self.clock.now();
        let job = Job {
            job_id: new_id(),
            addon_id: req.addon_id,
            job_type: req.job_type,
            priority: req.priority,
            requested_units: req.requested_units,
            unique: req.unique,
            idempotency_key: req.idempotency_key,
            state: JobState::Queued,
            payload: req.payload,
            tags: req.tags,
            max_runtime_s: req.max_runtime_s,
            lease_id: None,
            created_at: now,
            updated_at: now,
            leased_at: None,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };

        store.insert_queued(job.clone());
        drop(store);

        info!(job_id = %job.job_id, addon_id = %job.addon_id, priority = job.priority.as_str(), "job submitted");
        self.emit_audit(
            "job",
            &job.job_id,
            "JOB_SUBMITTED",
            json!({
                "addon_id": job.addon_id,
                "job_type": job.job_type,
                "priority": job.priority.as_str(),
                "requested_units": job.requested_units,
            }),
        );
        Ok(job)
    }

    // ---------- Lease request (pull model) ----------

    pub async fn request_lease(&self, req: RequestLeaseRequest) -> RequestLeaseResponse {
        let mut store = self.store.lock().await;
        let now = self.clock.now();

        // Expire first so the capacity math is accurate.
        self.expire_overdue_locked(&mut store, now);

        let busy = self.busy_bucket();
        let usable = usable_capacity_units(
            busy,
            self.settings.total_capacity_units,
            self.settings.reserve_units,
        );
        let leased = store.leased_units();
        let available = usable.saturating_sub(leased);

        if available == 0 {
            return RequestLeaseResponse::denied(
                format!("no capacity (busy={busy}, usable={usable}, leased={leased})"),
                retry_after_ms(busy, self.settings.retry_base_ms),
            );
        }

        let grant_cap = req.max_units.map(|m| m.min(available)).unwrap_or(available);
        // Units of the first candidate that did not fit the available budget;
        // drives a pressure-proportional denial instead of the small retry.
        let mut capacity_short: Option<u32> = None;

        for priority in JobPriority::ORDERED {
            let Some(job_id) = store.pop_candidate(priority) else {
                continue;
            };

            let (units, unique) = {
                let job = &store.jobs[&job_id];
                (job.requested_units, job.unique)
            };

            if units > grant_cap {
                if units > available {
                    capacity_short.get_or_insert(units);
                }
                store.requeue_front(job_id, priority);
                continue;
            }
            if unique && store.worker_holds_lease(&req.worker_id) {
                store.requeue_front(job_id, priority);
                continue;
            }

            let lease = Lease {
                lease_id: new_id(),
                job_id: job_id.clone(),
                worker_id: req.worker_id.clone(),
                capacity_units: units,
                issued_at: now,
                expires_at: now + self.lease_duration(),
                last_heartbeat: now,
            };

            let job = store.jobs.get_mut(&job_id).expect("candidate job exists");
            job.state = JobState::Leased;
            job.lease_id = Some(lease.lease_id.clone());
            job.leased_at = Some(now);
            job.updated_at = now;
            let job = job.clone();
            store.insert_lease(lease.clone());
            drop(store);

            info!(
                job_id = %job.job_id,
                lease_id = %lease.lease_id,
                worker_id = %req.worker_id,
                capacity_units = units,
                "lease granted"
            );
            self.emit_audit(
                "lease",
                &lease.lease_id,
                "LEASE_GRANTED",
                json!({
                    "job_id": job.job_id,
                    "worker_id": req.worker_id,
                    "capacity_units": units,
                }),
            );
            self.emit_job_row(&job, Some(&lease));
            return RequestLeaseResponse::granted(lease, job);
        }

        if let Some(units) = capacity_short {
            return RequestLeaseResponse::denied(
                format!(
                    "next job needs {units}u but only {available}u available \
                     (busy={busy}, usable={usable}, leased={leased})"
                ),
                retry_after_ms(busy, self.settings.retry_base_ms),
            );
        }
        RequestLeaseResponse::denied(
            "no eligible jobs".to_string(),
            retry_after_ms(0, self.settings.retry_base_ms),
        )
    }

    // ---------- Heartbeat ----------

    pub async fn heartbeat(&self, lease_id: &str, worker_id: &str) -> Result<Lease, SchedulerError> {
        let mut store = self.store.lock().await;
        let now = self.clock.now();

        let Some(lease) = store.leases.get(lease_id) else {
            return Err(SchedulerError::LeaseNotFound);
        };
        if lease.worker_id != worker_id {
            return Err(SchedulerError::WorkerMismatch);
        }
        if lease.expires_at <= now {
            // The reaper has not caught this one yet; expire it here and tell
            // the worker to stop.
            self.expire_lease_locked(&mut store, lease_id.to_string(), now);
            return Err(SchedulerError::LeaseInactive);
        }

        let lease = store.leases.get_mut(lease_id).expect("checked above");
        lease.last_heartbeat = now;
        lease.expires_at = now + self.lease_duration();
        let lease = lease.clone();

        let mut promoted = None;
        if let Some(job) = store.jobs.get_mut(&lease.job_id) {
            if job.state == JobState::Leased {
                // First heartbeat: the worker has started.
                job.state = JobState::Running;
                job.started_at = Some(now);
                promoted = Some(job.clone());
            }
            job.updated_at = now;
        }
        drop(store);

        if let Some(job) = promoted {
            debug!(job_id = %job.job_id, lease_id, "job running");
            self.emit_job_row(&job, Some(&lease));
        }
        Ok(lease)
    }

    // ---------- Complete ----------

    pub async fn complete(
        &self,
        lease_id: &str,
        worker_id: &str,
        status: CompleteStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let mut store = self.store.lock().await;
        let now = self.clock.now();

        self.expire_overdue_locked(&mut store, now);

        let Some(lease) = store.leases.get(lease_id) else {
            // Already released or expired: a late reconfirmation, not an error.
            return Ok(());
        };
        if lease.worker_id != worker_id {
            return Err(SchedulerError::WorkerMismatch);
        }

        // Remove the lease first, then finalize the job.
        let lease = store.remove_lease(lease_id).expect("checked above");
        let finalized = store.jobs.get_mut(&lease.job_id).map(|job| {
            job.state = match status {
                CompleteStatus::Completed => JobState::Completed,
                CompleteStatus::Failed => JobState::Failed,
            };
            job.lease_id = None;
            job.result = result;
            job.error = error;
            job.finished_at = Some(now);
            job.updated_at = now;
            job.clone()
        });
        drop(store);

        if let Some(job) = finalized {
            info!(
                job_id = %job.job_id,
                lease_id,
                worker_id,
                state = job.state.as_str(),
                "lease released"
            );
            self.emit_audit(
                "lease",
                lease_id,
                "LEASE_RELEASED",
                json!({
                    "job_id": job.job_id,
                    "worker_id": worker_id,
                    "state": job.state.as_str(),
                }),
            );
            self.emit_job_row(&job, Some(&lease));
        }
        Ok(())
    }

    // ---------- Queries ----------

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let store = self.store.lock().await;
        let busy = self.busy_bucket();
        let usable = usable_capacity_units(
            busy,
            self.settings.total_capacity_units,
            self.settings.reserve_units,
        );
        let leased = store.leased_units();

        SchedulerSnapshot {
            busy_rating: busy,
            total_capacity_units: self.settings.total_capacity_units,
            usable_capacity_units: usable,
            leased_capacity_units: leased,
            available_capacity_units: usable.saturating_sub(leased),
            queue_depths: store.queue_depths(),
            active_leases: store.leases.len(),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        let store = self.store.lock().await;
        store.jobs.get(job_id).cloned()
    }

    /// List in-memory jobs, newest first.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> (Vec<Job>, u64) {
        let store = self.store.lock().await;
        let mut jobs: Vec<Job> = store
            .jobs
            .values()
            .filter(|j| state.map(|s| j.state == s).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.job_id.cmp(&a.job_id)));
        let total = jobs.len() as u64;
        jobs.truncate(limit);
        (jobs, total)
    }

    // ---------- Expiry reaper ----------

    /// One reaper pass: expire overdue leases and evict stale terminal jobs.
    pub async fn expire_tick(&self) -> usize {
        let mut store = self.store.lock().await;
        let now = self.clock.now();
        let expired = self.expire_overdue_locked(&mut store, now);
        store.evict_terminal(
            now,
            self.settings.terminal_retention_s,
            self.settings.terminal_cap,
        );
        expired
    }

    /// Expire every lease that is past its deadline or whose job has exceeded
    /// `max_runtime_s` since the lease was issued. Must run under the lock.
    fn expire_overdue_locked(&self, store: &mut JobStore, now: chrono::DateTime<chrono::Utc>) -> usize {
        let overdue: Vec<String> = store
            .leases
            .values()
            .filter(|lease| {
                if lease.expires_at <= now {
                    return true;
                }
                store
                    .jobs
                    .get(&lease.job_id)
                    .and_then(|job| job.max_runtime_s)
                    .map(|max| lease.issued_at + ChronoDuration::seconds(max as i64) <= now)
                    .unwrap_or(false)
            })
            .map(|lease| lease.lease_id.clone())
            .collect();

        let count = overdue.len();
        for lease_id in overdue {
            self.expire_lease_locked(store, lease_id, now);
        }
        count
    }

    fn expire_lease_locked(
        &self,
        store: &mut JobStore,
        lease_id: String,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let Some(lease) = store.remove_lease(&lease_id) else {
            return;
        };
        let expired_job = store.jobs.get_mut(&lease.job_id).and_then(|job| {
            if matches!(job.state, JobState::Leased | JobState::Running) {
                job.state = JobState::Expired;
                job.lease_id = None;
                job.finished_at = Some(now);
                job.updated_at = now;
                Some(job.clone())
            } else {
                None
            }
        });

        if let Some(job) = expired_job {
            warn!(job_id = %job.job_id, lease_id = %lease.lease_id, worker_id = %lease.worker_id, "lease expired");
            self.emit_audit(
                "lease",
                &lease.lease_id,
                "LEASE_EXPIRED",
                json!({
                    "job_id": job.job_id,
                    "worker_id": lease.worker_id,
                    "capacity_units": lease.capacity_units,
                }),
            );
            self.emit_job_row(&job, Some(&lease));
        }
    }

    /// Background reaper loop. Finishes the current pass before exiting on
    /// shutdown.
    pub fn spawn_reaper(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(engine.settings.reaper_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = engine.expire_tick().await;
                        if expired > 0 {
                            debug!(expired, "reaper expired leases");
                        }
                    }
                    _ = token.cancelled() => {
                        info!("reaper stopping");
                        break;
                    }
                }
            }
        })
    }
}
