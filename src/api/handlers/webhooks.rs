use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
};

/// `POST /webhooks/{provider}`, the provider's delivery endpoint. A 200
/// acknowledges the event (including duplicates, so the provider stops
/// retrying); 400 means the delivery itself was bad; 500 asks the provider
/// to redeliver later.
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    if provider != state.provider_name {
        return Err(AppError::NotFound(format!("unknown provider: {}", provider)));
    }

    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Signature("missing Stripe-Signature header".to_string()))?;

    let ack = state.processor.process(&provider, signature, &body).await?;

    Ok(Json(json!({ "status": ack.as_str() })))
}
