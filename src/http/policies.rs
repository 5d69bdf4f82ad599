//! `/v1.0/{tenant}/groups/{group}/policies...`.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::error_response::ApiError;
use super::pagination::{links, PageQuery};
use super::AppState;
use crate::policy::ExecutionOutcome;
use crate::store::group_store::GroupStore;
use crate::types::{Policy, PolicyInput, PolicyPatch};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1.0/:tenant/groups/:group/policies",
            get(list_policies).post(create_policies),
        )
        .route(
            "/v1.0/:tenant/groups/:group/policies/:policy",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route(
            "/v1.0/:tenant/groups/:group/policies/:policy/execute",
            axum::routing::post(execute_policy),
        )
}

#[derive(Debug, Deserialize)]
struct CreatePoliciesBody {
    policies: Vec<PolicyInput>,
}

async fn create_policies(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
    Json(body): Json<CreatePoliciesBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let created = state.store.create_policies(&tenant, &group, body.policies).await?;
    Ok(Json(json!({ "policies": created })))
}

async fn list_policies(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = page.limit_or_default(state.config.limits.pagination);
    let policies: Vec<Policy> = state
        .store
        .list_policies(&tenant, &group, limit, page.marker.as_deref())
        .await?;
    let href = format!("/v1.0/{tenant}/groups/{group}/policies");
    let next_href = match policies.last() {
        Some(last) => format!("{href}?marker={}", last.policy_id),
        None => href.clone(),
    };
    Ok(Json(json!({
        "policies": policies,
        "policies_links": links(&href, &next_href, policies.len(), limit),
    })))
}

async fn get_policy(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
) -> Result<Json<Policy>, ApiError> {
    Ok(Json(state.store.get_policy(&tenant, &group, &policy).await?))
}

async fn update_policy(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
    Json(patch): Json<PolicyPatch>,
) -> Result<Json<Policy>, ApiError> {
    Ok(Json(state.store.update_policy(&tenant, &group, &policy, patch).await?))
}

async fn delete_policy(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_policy(&tenant, &group, &policy).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn execute_policy(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.executor.execute(&tenant, &group, &policy).await?;
    Ok(Json(match outcome {
        ExecutionOutcome::Applied { previous_desired, new_desired } => {
            json!({ "status": "applied", "previousDesired": previous_desired, "desired": new_desired })
        }
        ExecutionOutcome::CooldownSkipped => json!({ "status": "cooldown_skipped" }),
    }))
}
