use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Id;

/// Job state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Leased,
    Running,
    Completed,
    Failed,
    Expired,
}

impl JobState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Leased => "leased",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Expired => "expired",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "leased" => Ok(JobState::Leased),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "expired" => Ok(JobState::Expired),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Job priority, strictly ordered for dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
    Background,
}

impl JobPriority {
    /// Dispatch order, most urgent first.
    pub const ORDERED: [JobPriority; 4] = [
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
        JobPriority::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
            JobPriority::Background => "background",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            "background" => Ok(JobPriority::Background),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Unit of intended work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Id,
    pub addon_id: String,
    pub job_type: String,
    pub priority: JobPriority,
    pub requested_units: u32,
    pub unique: bool,
    pub idempotency_key: Option<String>,
    pub state: JobState,
    pub payload: JsonValue,
    pub tags: Vec<String>,
    pub max_runtime_s: Option<u64>,
    pub lease_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

/// Request to submit a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub addon_id: String,
    #[serde(default = "default_job_type")]
    pub job_type: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_requested_units")]
    pub requested_units: u32,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub max_runtime_s: Option<u64>,
}

fn default_job_type() -> String {
    "generic".to_string()
}

fn default_requested_units() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Id,
    pub state: JobState,
}

/// Job list response, newest first
#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: u64,
}

/// Point-in-time view of the scheduler for `GET /scheduler/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub busy_rating: u8,
    pub total_capacity_units: u32,
    pub usable_capacity_units: u32,
    pub leased_capacity_units: u32,
    pub available_capacity_units: u32,
    pub queue_depths: std::collections::BTreeMap<String, usize>,
    pub active_leases: usize,
}
