use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Id, Job};

/// Time-bounded permission to execute exactly one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Id,
    pub job_id: Id,
    pub worker_id: String,
    pub capacity_units: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Worker pull request for work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLeaseRequest {
    pub worker_id: String,
    #[serde(default)]
    pub max_units: Option<u32>,
    /// Accepted but not yet matched against jobs.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Lease request outcome. Denial is a structured 200, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestLeaseResponse {
    Granted {
        denied: bool,
        lease: Lease,
        job: Job,
    },
    Denied {
        denied: bool,
        reason: String,
        retry_after_ms: u64,
    },
}

impl RequestLeaseResponse {
    pub fn granted(lease: Lease, job: Job) -> Self {
        RequestLeaseResponse::Granted {
            denied: false,
            lease,
            job,
        }
    }

    pub fn denied(reason: String, retry_after_ms: u64) -> Self {
        RequestLeaseResponse::Denied {
            denied: true,
            reason,
            retry_after_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub expires_at: DateTime<Utc>,
}

/// Final status a worker may report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompleteStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteLeaseRequest {
    pub worker_id: String,
    pub status: CompleteStatus,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteLeaseResponse {
    pub ok: bool,
}
