//! Server Cache: per-group snapshot of last-observed
//! servers, used by convergence instead of hitting the cloud API every
//! cycle. Last-writer-wins on `(group_id, last_update)`; readers never
//! block writers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ServerCacheEntry {
    pub last_update: DateTime<Utc>,
    /// Cleaned server blob paired with the `_is_as_active` bit read from
    /// it at write time. The bit is kept out-of-band so the blob itself
    /// is never mutated beyond stripping the transient field.
    servers: Vec<(Value, bool)>,
}

#[derive(Default)]
pub struct ServerCache {
    by_group: DashMap<(String, String), ServerCacheEntry>,
}

/// Transient field stripped from each server dict before persisting.
const TRANSIENT_ACTIVE_FLAG: &str = "_is_as_active";

impl ServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: &str, group_id: &str) -> (String, String) {
        (tenant_id.to_string(), group_id.to_string())
    }

    /// Returns the cached servers and the time they were captured, or
    /// `(empty, None)` if nothing has ever been cached for this group.
    /// When `only_as_active` is set, only servers whose `_is_as_active`
    /// flag was `true` at write time are returned. The returned dicts are
    /// exactly what was cached, minus the transient flag — the active bit
    /// is tracked out-of-band and never rejoins the blob.
    pub fn get_servers(
        &self,
        tenant_id: &str,
        group_id: &str,
        only_as_active: bool,
    ) -> (Vec<Value>, Option<DateTime<Utc>>) {
        match self.by_group.get(&Self::key(tenant_id, group_id)) {
            Some(entry) => {
                let servers = entry
                    .servers
                    .iter()
                    .filter(|(_, was_active)| !only_as_active || *was_active)
                    .map(|(server, _)| server.clone())
                    .collect();
                (servers, Some(entry.last_update))
            }
            None => (Vec::new(), None),
        }
    }

    /// Updates the cache, stripping the transient `_is_as_active` field
    /// from each server and recording it separately so `only_as_active`
    /// reads keep working without the stored blob ever gaining a field it
    /// didn't come in with.
    pub fn update_servers(
        &self,
        tenant_id: &str,
        group_id: &str,
        now: DateTime<Utc>,
        servers: Vec<Value>,
    ) {
        let cleaned = servers
            .into_iter()
            .map(|mut server| {
                let was_active = match &mut server {
                    Value::Object(obj) => obj
                        .remove(TRANSIENT_ACTIVE_FLAG)
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    _ => false,
                };
                (server, was_active)
            })
            .collect();

        self.by_group.insert(
            Self::key(tenant_id, group_id),
            ServerCacheEntry {
                last_update: now,
                servers: cleaned,
            },
        );
    }

    pub fn delete_servers(&self, tenant_id: &str, group_id: &str) {
        self.by_group.remove(&Self::key(tenant_id, group_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_cache_returns_none_last_update() {
        let cache = ServerCache::new();
        let (servers, last_update) = cache.get_servers("t1", "g1", false);
        assert!(servers.is_empty());
        assert!(last_update.is_none());
    }

    #[test]
    fn update_strips_transient_flag() {
        let cache = ServerCache::new();
        let now = Utc::now();
        cache.update_servers(
            "t1",
            "g1",
            now,
            vec![json!({"id": "srv-1", "_is_as_active": true})],
        );
        let (servers, last_update) = cache.get_servers("t1", "g1", false);
        assert_eq!(last_update, Some(now));
        assert!(servers[0].get("_is_as_active").is_none());
    }

    #[test]
    fn only_as_active_filters_non_active_servers() {
        let cache = ServerCache::new();
        let now = Utc::now();
        cache.update_servers(
            "t1",
            "g1",
            now,
            vec![
                json!({"id": "srv-1", "_is_as_active": true}),
                json!({"id": "srv-2", "_is_as_active": false}),
            ],
        );
        let (servers, _) = cache.get_servers("t1", "g1", true);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0]["id"], "srv-1");
    }

    #[test]
    fn returned_blob_gains_no_shadow_active_key() {
        let cache = ServerCache::new();
        cache.update_servers(
            "t1",
            "g1",
            Utc::now(),
            vec![json!({"id": "srv-1", "_is_as_active": true})],
        );
        let (servers, _) = cache.get_servers("t1", "g1", false);
        assert_eq!(servers[0], json!({"id": "srv-1"}));
    }

    #[test]
    fn delete_servers_clears_the_entry() {
        let cache = ServerCache::new();
        cache.update_servers("t1", "g1", Utc::now(), vec![json!({"id": "srv-1"})]);
        cache.delete_servers("t1", "g1");
        let (servers, last_update) = cache.get_servers("t1", "g1", false);
        assert!(servers.is_empty());
        assert!(last_update.is_none());
    }
}
