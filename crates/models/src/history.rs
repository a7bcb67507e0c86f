use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::{Id, Job, JobPriority, JobState, Lease};

/// Denormalized projection of a job at a non-queued state, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub job_id: Id,
    pub addon_id: String,
    pub job_type: String,
    pub priority: JobPriority,
    pub requested_units: u32,
    pub unique: bool,
    pub state: JobState,
    pub tags: Vec<String>,
    pub idempotency_key: Option<String>,
    pub lease_id: Option<Id>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub queue_wait_s: Option<f64>,
    pub runtime_s: Option<f64>,
    pub error: Option<String>,
    pub result: Option<JsonValue>,
}

impl JobHistoryRecord {
    /// Project a job (and the lease it is or was attached to) into a row.
    pub fn project(job: &Job, lease: Option<&Lease>) -> Self {
        let worker_id = lease.map(|l| l.worker_id.clone());
        let leased_at = job.leased_at.or_else(|| lease.map(|l| l.issued_at));
        let queue_wait_s = leased_at.map(|t| (t - job.created_at).num_milliseconds() as f64 / 1000.0);
        let runtime_s = match (leased_at, job.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        Self {
            job_id: job.job_id.clone(),
            addon_id: job.addon_id.clone(),
            job_type: job.job_type.clone(),
            priority: job.priority,
            requested_units: job.requested_units,
            unique: job.unique,
            state: job.state,
            tags: job.tags.clone(),
            idempotency_key: job.idempotency_key.clone(),
            lease_id: job.lease_id.clone().or_else(|| lease.map(|l| l.lease_id.clone())),
            worker_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
            leased_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            queue_wait_s,
            runtime_s,
            error: job.error.clone(),
            result: job.result.clone(),
        }
    }
}

/// Append-only audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub entity_kind: String,
    pub entity_id: Id,
    pub event_type: String,
    pub data: JsonValue,
}

/// Payload carried from the scheduler critical section to the durable writer
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    Job(Box<JobHistoryRecord>),
    Audit(AuditEvent),
}

/// Per-addon runtime statistics over a history window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonHistoryStats {
    pub addon_id: String,
    pub count: u64,
    pub states: BTreeMap<String, u64>,
    pub avg_runtime_s: Option<f64>,
    pub p95_runtime_s: Option<f64>,
    pub avg_queue_wait_s: Option<f64>,
}

/// Aggregate history statistics for `GET /scheduler/history/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStats {
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub total: u64,
    pub totals_by_state: BTreeMap<String, u64>,
    pub success_rate: Option<f64>,
    pub avg_queue_wait_s: Option<f64>,
    pub addons: Vec<AddonHistoryStats>,
}
