use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use workgate_models::{HealthSnapshot, SchedulerError};

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/system/stats/current", get(current_stats))
        .route("/system/stats/history", get(stats_history))
}

/// Latest cached health snapshot. Never samples on the request path.
async fn current_stats(State(state): State<AppState>) -> Result<Json<HealthSnapshot>, ApiError> {
    let snapshot = state
        .sampler
        .latest()
        .ok_or(SchedulerError::StatsUnavailable)?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct StatsHistoryQuery {
    n: Option<i64>,
}

/// Recent minute samples as `(ts, busy)` pairs, oldest first.
async fn stats_history(
    State(state): State<AppState>,
    Query(query): Query<StatsHistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let n = query.n.unwrap_or(1440).clamp(1, 1440);
    let rows = state.stats.last_n(n).await?;
    let samples: Vec<Value> = rows
        .into_iter()
        .map(|(ts, busy)| json!({ "ts": ts, "busy": busy }))
        .collect();
    Ok(Json(json!({ "samples": samples })))
}
