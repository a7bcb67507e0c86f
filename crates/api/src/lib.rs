//! HTTP boundary: the only layer that maps scheduler results and errors onto
//! status codes and JSON bodies.

use axum::{middleware as axum_middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::*;
pub use state::*;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::scheduler::create_router())
        .merge(routes::system::create_router())
        .merge(routes::settings::create_router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_metrics_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
