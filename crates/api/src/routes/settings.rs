use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use workgate_models::SchedulerError;

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/system/settings", get(get_all))
        .route("/system/settings/:key", get(get_one).put(set_one))
}

async fn get_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.get_all().await?;
    Ok(Json(json!({ "ok": true, "settings": settings })))
}

async fn get_one(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let value = state
        .settings
        .get(&key)
        .await?
        .ok_or(SchedulerError::SettingNotFound)?;
    Ok(Json(json!({ "ok": true, "key": key, "value": value })))
}

#[derive(Debug, Deserialize)]
struct SetSettingRequest {
    value: Value,
}

async fn set_one(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SetSettingRequest>,
) -> Result<Json<Value>, ApiError> {
    state.settings.set(&key, &request.value).await?;
    Ok(Json(json!({ "ok": true, "key": key, "value": request.value })))
}
