//! `/v1.0/{tenant}/groups...`.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::error_response::ApiError;
use super::pagination::{links, PageQuery};
use super::AppState;
use crate::store::group_store::GroupStore;
use crate::types::{LaunchConfig, PolicyInput, ScalingGroupConfig, ScalingGroupConfigPatch};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1.0/:tenant/groups", get(list_groups).post(create_group))
        .route("/v1.0/:tenant/groups/:group", get(view_group).delete(delete_group))
        .route("/v1.0/:tenant/groups/:group/state", get(view_state))
        .route(
            "/v1.0/:tenant/groups/:group/config",
            get(view_config).put(update_config),
        )
        .route("/v1.0/:tenant/groups/:group/launch", get(view_launch_config))
}

#[derive(Debug, Deserialize)]
struct CreateGroupBody {
    #[serde(rename = "groupConfiguration")]
    config: ScalingGroupConfig,
    #[serde(rename = "launchConfiguration")]
    launch: LaunchConfig,
    #[serde(default)]
    #[serde(rename = "scalingPolicies")]
    policies: Vec<PolicyInput>,
}

async fn create_group(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(body): Json<CreateGroupBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    body.config.validate().map_err(|msg| {
        ApiError(crate::error::CoreError::UpstreamError {
            system: "validation".to_string(),
            operation: "create_group".to_string(),
            url: format!("/v1.0/{tenant}/groups"),
            cause: crate::error::UpstreamCause {
                code: None,
                body: Some(msg),
                headers: None,
            },
        })
    })?;
    let manifest = state
        .store
        .create_group(&tenant, body.config, body.launch, body.policies)
        .await?;
    Ok(Json(json!({ "group": manifest })))
}

async fn list_groups(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = page.limit_or_default(state.config.limits.pagination);
    let groups = state.store.list_groups(&tenant, limit, page.marker.as_deref()).await?;
    let href = format!("/v1.0/{tenant}/groups");
    let next_href = match groups.last() {
        Some(last) => format!("{href}?marker={}", last.id),
        None => href.clone(),
    };
    Ok(Json(json!({
        "groups": groups,
        "groups_links": links(&href, &next_href, groups.len(), limit),
    })))
}

async fn view_group(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let manifest = state.store.view_manifest(&tenant, &group, true, true, false).await?;
    Ok(Json(json!({ "group": manifest })))
}

async fn delete_group(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_group(&tenant, &group).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn view_state(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.store.view_state(&tenant, &group).await?;
    Ok(Json(json!({ "group": snapshot })))
}

async fn view_config(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
) -> Result<Json<ScalingGroupConfig>, ApiError> {
    Ok(Json(state.store.view_config(&tenant, &group).await?))
}

async fn update_config(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
    Json(patch): Json<ScalingGroupConfigPatch>,
) -> Result<Json<ScalingGroupConfig>, ApiError> {
    Ok(Json(state.store.update_config(&tenant, &group, patch).await?))
}

async fn view_launch_config(
    State(state): State<AppState>,
    Path((tenant, group)): Path<(String, String)>,
) -> Result<Json<LaunchConfig>, ApiError> {
    Ok(Json(state.store.view_launch_config(&tenant, &group).await?))
}
