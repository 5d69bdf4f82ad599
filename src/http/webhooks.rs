//! `/v1.0/{tenant}/groups/{group}/policies/{policy}/webhooks...`.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::error_response::ApiError;
use super::pagination::{links, PageQuery};
use super::AppState;
use crate::store::group_store::GroupStore;
use crate::types::{Webhook, WebhookInput, WebhookPatch};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1.0/:tenant/groups/:group/policies/:policy/webhooks",
            get(list_webhooks).post(create_webhooks),
        )
        .route(
            "/v1.0/:tenant/groups/:group/policies/:policy/webhooks/:webhook",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
}

#[derive(Debug, Deserialize)]
struct CreateWebhooksBody {
    webhooks: Vec<WebhookInput>,
}

async fn create_webhooks(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
    Json(body): Json<CreateWebhooksBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let created = state
        .store
        .create_webhooks(&tenant, &group, &policy, body.webhooks)
        .await?;
    let with_urls: Vec<serde_json::Value> = created
        .iter()
        .map(|webhook| {
            json!({
                "webhook": webhook,
                "capabilityUrl": state.config.capability_url(webhook.capability.version, &webhook.capability.hash),
            })
        })
        .collect();
    Ok(Json(json!({ "webhooks": with_urls })))
}

async fn list_webhooks(
    State(state): State<AppState>,
    Path((tenant, group, policy)): Path<(String, String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = page.limit_or_default(state.config.limits.pagination);
    let webhooks: Vec<Webhook> = state
        .store
        .list_webhooks(&tenant, &group, &policy, limit, page.marker.as_deref())
        .await?;
    let href = format!("/v1.0/{tenant}/groups/{group}/policies/{policy}/webhooks");
    let next_href = match webhooks.last() {
        Some(last) => format!("{href}?marker={}", last.webhook_id),
        None => href.clone(),
    };
    Ok(Json(json!({
        "webhooks": webhooks,
        "webhooks_links": links(&href, &next_href, webhooks.len(), limit),
    })))
}

async fn get_webhook(
    State(state): State<AppState>,
    Path((tenant, group, policy, webhook)): Path<(String, String, String, String)>,
) -> Result<Json<Webhook>, ApiError> {
    Ok(Json(state.store.get_webhook(&tenant, &group, &policy, &webhook).await?))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path((tenant, group, policy, webhook)): Path<(String, String, String, String)>,
    Json(patch): Json<WebhookPatch>,
) -> Result<Json<Webhook>, ApiError> {
    Ok(Json(
        state
            .store
            .update_webhook(&tenant, &group, &policy, &webhook, patch)
            .await?,
    ))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path((tenant, group, policy, webhook)): Path<(String, String, String, String)>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_webhook(&tenant, &group, &policy, &webhook).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
