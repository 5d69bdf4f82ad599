//! Admin/Metrics: aggregate counts of
//! groups, policies and webhooks per deployment, plus the store's health
//! check, surfaced over HTTP in `http::admin`.

use crate::store::group_store::{GroupCounts, GroupStore};

pub struct Admin<S: GroupStore> {
    store: std::sync::Arc<S>,
}

impl<S: GroupStore> Admin<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }

    pub async fn counts(&self, tenant_id: &str) -> GroupCounts {
        self.store.get_counts(tenant_id).await
    }

    pub async fn health_check(&self) -> (bool, serde_json::Value) {
        self.store.health_check().await
    }
}
