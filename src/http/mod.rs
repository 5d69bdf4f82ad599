//! HTTP REST facade: one `Router` per concern, merged
//! here, served over plain HTTP. TLS is out of scope for this public
//! control-plane API (see `DESIGN.md`).

mod admin;
mod error_response;
mod execute;
mod groups;
mod pagination;
mod policies;
mod webhooks;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::admin::Admin;
use crate::config::Config;
use crate::policy::PolicyExecutor;
use crate::store::group_store::InMemoryGroupStore;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryGroupStore>,
    pub executor: Arc<PolicyExecutor<InMemoryGroupStore>>,
    pub admin: Arc<Admin<InMemoryGroupStore>>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(groups::router())
        .merge(policies::router())
        .merge(webhooks::router())
        .merge(execute::router())
        .merge(admin::router())
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler() -> Result<String, StatusCode> {
    crate::metrics::render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
