//! `/v1.0/{tenant}/admin/...` — counts and health, wrapping `crate::admin`.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1.0/:tenant/admin/counts", get(counts))
        .route("/v1.0/admin/health", get(health))
}

async fn counts(State(state): State<AppState>, Path(tenant): Path<String>) -> Json<serde_json::Value> {
    let counts = state.admin.counts(&tenant).await;
    Json(json!({ "counts": counts }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (healthy, detail) = state.admin.health_check().await;
    Json(json!({ "healthy": healthy, "detail": detail }))
}
