use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Remit",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Asynchronous payment-processing core",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "webhooks": "/webhooks/{provider}"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
