//! Capability Index: resolves an unguessable webhook
//! bearer hash to `(tenant_id, group_id, policy_id)` for anonymous policy
//! execution. Multi-writer/multi-reader; readers never block writers.

use dashmap::DashMap;

use crate::error::CoreError;
use crate::ids::CAPABILITY_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTarget {
    pub tenant_id: String,
    pub group_id: String,
    pub policy_id: String,
}

#[derive(Default)]
pub struct CapabilityIndex {
    by_hash: DashMap<String, CapabilityTarget>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: String, target: CapabilityTarget) {
        self.by_hash.insert(hash, target);
    }

    pub fn remove(&self, hash: &str) {
        self.by_hash.remove(hash);
    }

    /// Removes every hash pointing at `policy_id` within `group_id` — used
    /// when a policy is deleted, cascading to its webhooks.
    pub fn remove_policy(&self, tenant_id: &str, group_id: &str, policy_id: &str) {
        self.by_hash.retain(|_, target| {
            !(target.tenant_id == tenant_id
                && target.group_id == group_id
                && target.policy_id == policy_id)
        });
    }

    pub fn lookup(&self, hash: &str) -> Result<CapabilityTarget, CoreError> {
        self.by_hash
            .get(hash)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::UnrecognizedCapability {
                hash: hash.to_string(),
                version: CAPABILITY_VERSION,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> CapabilityTarget {
        CapabilityTarget {
            tenant_id: "t1".into(),
            group_id: "g1".into(),
            policy_id: "p1".into(),
        }
    }

    #[test]
    fn lookup_resolves_inserted_hash() {
        let index = CapabilityIndex::new();
        index.insert("hash-1".to_string(), target());
        assert_eq!(index.lookup("hash-1").unwrap(), target());
    }

    #[test]
    fn lookup_of_deleted_webhook_is_unrecognized() {
        let index = CapabilityIndex::new();
        index.insert("hash-1".to_string(), target());
        index.remove("hash-1");
        assert!(matches!(
            index.lookup("hash-1"),
            Err(CoreError::UnrecognizedCapability { .. })
        ));
    }

    #[test]
    fn remove_policy_cascades_across_multiple_webhooks() {
        let index = CapabilityIndex::new();
        index.insert("hash-a".to_string(), target());
        index.insert("hash-b".to_string(), target());
        index.insert(
            "hash-c".to_string(),
            CapabilityTarget {
                policy_id: "other-policy".into(),
                ..target()
            },
        );

        index.remove_policy("t1", "g1", "p1");

        assert!(matches!(
            index.lookup("hash-a"),
            Err(CoreError::UnrecognizedCapability { .. })
        ));
        assert!(matches!(
            index.lookup("hash-b"),
            Err(CoreError::UnrecognizedCapability { .. })
        ));
        assert!(index.lookup("hash-c").is_ok());
    }

    #[test]
    fn lookup_of_unknown_hash_is_unrecognized() {
        let index = CapabilityIndex::new();
        assert!(matches!(
            index.lookup("never-inserted"),
            Err(CoreError::UnrecognizedCapability { .. })
        ));
    }
}
