//! Service-level handlers

use crate::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

/// GET / - health check listing the mounted providers
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.provider_names(),
    }))
}

/// HEAD / - liveness check
pub async fn health_head() -> impl IntoResponse {
    axum::http::StatusCode::OK
}
