use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::time::Instant;

use workgate_monitor::ApiEvent;

use crate::state::AppState;

/// Record every request into the rolling API window.
///
/// Inflight is decremented even when the handler returns an error response;
/// monitoring and documentation paths are skipped entirely.
pub async fn api_metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.metrics.is_excluded(&path) {
        return next.run(request).await;
    }

    let client = client_of(&request);
    state.metrics.begin();
    let started = Instant::now();
    let response = next.run(request).await;

    state.metrics.record(ApiEvent {
        at: Utc::now(),
        path,
        client,
        status: response.status().as_u16(),
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    });
    state.metrics.end();
    response
}

fn client_of(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
