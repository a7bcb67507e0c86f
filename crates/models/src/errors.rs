use thiserror::Error;

/// Scheduler errors
///
/// Admission outcomes (no capacity, no eligible jobs) are not errors: workers
/// receive a structured denial body instead. Everything here is a genuine
/// caller or storage fault; the HTTP layer is the only place these map to
/// status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("idempotency key collides with job {job_id}")]
    IdempotencyConflict { job_id: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("lease not found")]
    LeaseNotFound,

    #[error("lease is held by a different worker")]
    WorkerMismatch,

    #[error("lease expired or already released")]
    LeaseInactive,

    #[error("setting not found")]
    SettingNotFound,

    #[error("no health snapshot collected yet")]
    StatsUnavailable,

    #[error("storage error: {reason}")]
    Storage { reason: String },
}

impl SchedulerError {
    /// Stable machine-readable code, used as the error envelope `detail`.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidArguments { .. } => "invalid_arguments",
            SchedulerError::IdempotencyConflict { .. } => "idempotency_conflict",
            SchedulerError::JobNotFound { .. } => "job_not_found",
            SchedulerError::LeaseNotFound => "lease_not_found",
            SchedulerError::WorkerMismatch => "worker_mismatch",
            SchedulerError::LeaseInactive => "lease_inactive",
            SchedulerError::SettingNotFound => "setting_not_found",
            SchedulerError::StatsUnavailable => "stats_unavailable",
            SchedulerError::Storage { .. } => "storage_error",
        }
    }

    /// HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            SchedulerError::InvalidArguments { .. } => 400,
            SchedulerError::IdempotencyConflict { .. } => 409,
            SchedulerError::JobNotFound { .. } => 404,
            SchedulerError::LeaseNotFound => 404,
            SchedulerError::WorkerMismatch => 403,
            SchedulerError::LeaseInactive => 409,
            SchedulerError::SettingNotFound => 404,
            SchedulerError::StatsUnavailable => 503,
            SchedulerError::Storage { .. } => 500,
        }
    }
}

/// Error envelope for API responses
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: u16,
}

impl From<&SchedulerError> for ErrorResponse {
    fn from(err: &SchedulerError) -> Self {
        Self {
            detail: err.code().to_string(),
            code: err.status_code(),
        }
    }
}
