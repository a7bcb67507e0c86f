use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use workgate_models::{ErrorResponse, SchedulerError};

/// Newtype so scheduler errors can cross the axum boundary.
#[derive(Debug)]
pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(SchedulerError::Storage {
            reason: err.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}
