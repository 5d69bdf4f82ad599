//! `POST /v1.0/execute/{version}/{hash}` — the anonymous webhook entry
//! point. No tenant/group/policy path segments:
//! the Capability Index resolves the target, so this route is mounted
//! unauthenticated.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::error_response::ApiError;
use super::AppState;
use crate::policy::ExecutionOutcome;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1.0/execute/:version/:hash", post(execute_webhook))
}

async fn execute_webhook(
    State(state): State<AppState>,
    Path((_version, hash)): Path<(u32, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.executor.execute_via_webhook(&hash).await?;
    Ok(Json(match outcome {
        ExecutionOutcome::Applied { previous_desired, new_desired } => {
            json!({ "status": "applied", "previousDesired": previous_desired, "desired": new_desired })
        }
        ExecutionOutcome::CooldownSkipped => json!({ "status": "cooldown_skipped" }),
    }))
}
