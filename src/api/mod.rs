pub mod handlers;
pub mod state;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::webhooks::MAX_BODY_BYTES;
use state::AppState;

pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        // Liveness for orchestration
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Provider callbacks (no auth beyond the signature itself)
        .route("/webhooks/:provider", post(handlers::webhooks::receive))

        // Add state to the router
        .with_state(state)

        // Middleware. The body limit rejects oversized payloads before the
        // handler ever buffers them.
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
