//! Group Store: per-tenant catalog of scaling groups,
//! their policies and webhooks, manifest assembly, quota enforcement and
//! id-cursor pagination.
//!
//! `GroupState` mutations funnel through the Mutation Engine
//! (`store::mutation`) under the per-group lock; everything else here —
//! config, policies, webhooks — is plain metadata CRUD guarded by
//! `DashMap`'s own per-shard locking, which is enough exclusion for
//! catalog edits that never race with convergence.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::ClockHandle;
use crate::error::CoreError;
use crate::group_state::{GroupState, GroupStateSnapshot, ScalingGroupStatus};
use crate::ids::{self, CAPABILITY_VERSION};
use crate::metrics;
use crate::store::capability_index::{CapabilityIndex, CapabilityTarget};
use crate::store::mutation::StateTable;
use crate::types::{
    Capability, LaunchConfig, LaunchConfigPatch, Policy, PolicyInput, PolicyPatch,
    ScalingGroupConfig, ScalingGroupConfigPatch, ScalingGroupManifest, Webhook, WebhookInput,
    WebhookPatch,
};

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct GroupCounts {
    pub groups: usize,
    pub policies: usize,
    pub webhooks: usize,
}

struct GroupRecord {
    tenant_id: String,
    group_id: String,
    config: ScalingGroupConfig,
    launch_config: LaunchConfig,
    /// Ordered by `policy_id` to give `list_policies` a stable cursor.
    policies: BTreeMap<String, Policy>,
    webhooks: BTreeMap<String, BTreeMap<String, Webhook>>,
    created_at: DateTime<Utc>,
}

impl GroupRecord {
    /// `GroupState` itself lives in the shared `StateTable` the Mutation
    /// Engine also writes to — `snapshot` is read from there by the
    /// caller so this store and `PolicyExecutor`/`ConvergenceDispatcher`
    /// never disagree about a group's current state.
    fn manifest(&self, snapshot: GroupStateSnapshot, with_policies: bool, with_webhooks: bool) -> ScalingGroupManifest {
        ScalingGroupManifest {
            id: self.group_id.clone(),
            config: self.config.clone(),
            launch_config: self.launch_config.clone(),
            policies: with_policies.then(|| self.policies.values().cloned().collect()),
            webhooks: with_webhooks.then(|| {
                self.webhooks
                    .iter()
                    .map(|(policy_id, bucket)| (policy_id.clone(), bucket.values().cloned().collect()))
                    .collect()
            }),
            state: snapshot,
            created_at: self.created_at,
        }
    }
}

/// Quotas the store enforces on every write that grows a collection.
#[derive(Debug, Clone, Copy)]
pub struct Quotas {
    pub max_groups: usize,
    pub max_policies_per_group: usize,
    pub max_webhooks_per_policy: usize,
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn create_group(
        &self,
        tenant_id: &str,
        config: ScalingGroupConfig,
        launch_config: LaunchConfig,
        policies: Vec<PolicyInput>,
    ) -> Result<ScalingGroupManifest, CoreError>;

    async fn view_manifest(
        &self,
        tenant_id: &str,
        group_id: &str,
        with_policies: bool,
        with_webhooks: bool,
        get_deleting: bool,
    ) -> Result<ScalingGroupManifest, CoreError>;

    async fn view_config(&self, tenant_id: &str, group_id: &str) -> Result<ScalingGroupConfig, CoreError>;
    async fn view_launch_config(&self, tenant_id: &str, group_id: &str) -> Result<LaunchConfig, CoreError>;
    async fn view_state(&self, tenant_id: &str, group_id: &str) -> Result<GroupStateSnapshot, CoreError>;

    async fn update_config(
        &self,
        tenant_id: &str,
        group_id: &str,
        patch: ScalingGroupConfigPatch,
    ) -> Result<ScalingGroupConfig, CoreError>;

    async fn update_launch_config(
        &self,
        tenant_id: &str,
        group_id: &str,
        patch: LaunchConfigPatch,
    ) -> Result<LaunchConfig, CoreError>;

    async fn update_status(
        &self,
        tenant_id: &str,
        group_id: &str,
        status: ScalingGroupStatus,
    ) -> Result<(), CoreError>;

    async fn update_error_reasons(
        &self,
        tenant_id: &str,
        group_id: &str,
        reasons: Vec<String>,
    ) -> Result<(), CoreError>;

    async fn create_policies(
        &self,
        tenant_id: &str,
        group_id: &str,
        policies: Vec<PolicyInput>,
    ) -> Result<Vec<Policy>, CoreError>;

    async fn update_policy(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        patch: PolicyPatch,
    ) -> Result<Policy, CoreError>;

    async fn list_policies(
        &self,
        tenant_id: &str,
        group_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<Policy>, CoreError>;

    async fn get_policy(&self, tenant_id: &str, group_id: &str, policy_id: &str) -> Result<Policy, CoreError>;

    /// Deletes a policy, cascading to its webhooks and capability-index
    /// entries. Cascading to pending scheduled events is the caller's
    /// responsibility — the Group Store has no dependency on the
    /// Schedule Store.
    async fn delete_policy(&self, tenant_id: &str, group_id: &str, policy_id: &str) -> Result<(), CoreError>;

    async fn create_webhooks(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhooks: Vec<WebhookInput>,
    ) -> Result<Vec<Webhook>, CoreError>;

    async fn list_webhooks(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<Webhook>, CoreError>;

    async fn get_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
    ) -> Result<Webhook, CoreError>;

    async fn update_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
        patch: WebhookPatch,
    ) -> Result<Webhook, CoreError>;

    async fn delete_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
    ) -> Result<(), CoreError>;

    /// Fails `GroupNotEmpty` unless both `active` and `pending` are
    /// empty; otherwise marks the group `DELETING`. Physical removal is
    /// left to an out-of-band reaper — purge is asynchronous.
    async fn delete_group(&self, tenant_id: &str, group_id: &str) -> Result<(), CoreError>;

    async fn list_groups(
        &self,
        tenant_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<ScalingGroupManifest>, CoreError>;

    async fn list_scaling_group_states(
        &self,
        tenant_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<GroupStateSnapshot>, CoreError>;

    async fn get_counts(&self, tenant_id: &str) -> GroupCounts;

    /// Reports overall store health alongside a diagnostic payload.
    async fn health_check(&self) -> (bool, serde_json::Value);
}

pub struct InMemoryGroupStore {
    groups: DashMap<(String, String), GroupRecord>,
    states: Arc<StateTable>,
    capability_index: Arc<CapabilityIndex>,
    quotas: Quotas,
    clock: ClockHandle,
}

impl InMemoryGroupStore {
    /// `states` is shared with the `MutationEngine` wired alongside this
    /// store — both read and write the same `GroupState` table, which is
    /// the only way `view_state`/`view_manifest` ever reflect a policy
    /// execution or convergence result.
    pub fn new(states: Arc<StateTable>, capability_index: Arc<CapabilityIndex>, quotas: Quotas, clock: ClockHandle) -> Self {
        Self {
            groups: DashMap::new(),
            states,
            capability_index,
            quotas,
            clock,
        }
    }

    fn key(tenant_id: &str, group_id: &str) -> (String, String) {
        (tenant_id.to_string(), group_id.to_string())
    }

    fn state_snapshot(&self, tenant_id: &str, group_id: &str) -> Result<GroupStateSnapshot, CoreError> {
        self.states
            .get(tenant_id, group_id)
            .map(|state| GroupStateSnapshot::from(&state))
            .ok_or_else(|| CoreError::NoSuchGroup {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            })
    }

    fn state_snapshot_owned(&self, tenant_id: &str, group_id: &str) -> Result<GroupState, CoreError> {
        self.states.get(tenant_id, group_id).ok_or_else(|| CoreError::NoSuchGroup {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
        })
    }

    /// Looks up a visible group, applying the `DELETING`-hiding rule
    /// `view_manifest` describes.
    fn get_visible<'a>(
        &'a self,
        tenant_id: &str,
        group_id: &str,
        get_deleting: bool,
    ) -> Result<dashmap::mapref::one::Ref<'a, (String, String), GroupRecord>, CoreError> {
        let not_found = || CoreError::NoSuchGroup {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
        };
        let record = self
            .groups
            .get(&Self::key(tenant_id, group_id))
            .ok_or_else(not_found)?;
        let status = self.states.get(tenant_id, group_id).map(|s| s.status);
        if status == Some(ScalingGroupStatus::Deleting) && !get_deleting {
            return Err(not_found());
        }
        Ok(record)
    }

    fn get_visible_mut<'a>(
        &'a self,
        tenant_id: &str,
        group_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'a, (String, String), GroupRecord>, CoreError> {
        let not_found = || CoreError::NoSuchGroup {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
        };
        let record = self
            .groups
            .get_mut(&Self::key(tenant_id, group_id))
            .ok_or_else(not_found)?;
        let status = self.states.get(tenant_id, group_id).map(|s| s.status);
        if status == Some(ScalingGroupStatus::Deleting) {
            return Err(not_found());
        }
        Ok(record)
    }

    fn assign_policy_ids(policies: Vec<PolicyInput>) -> Vec<Policy> {
        policies
            .into_iter()
            .map(|input| Policy {
                policy_id: ids::new_id(),
                name: input.name,
                policy_type: input.policy_type,
                delta: input.delta,
                cooldown: input.cooldown,
                args: input.args,
                schedule: input.schedule,
            })
            .collect()
    }

    /// Returns ids `> marker`, ascending, truncated to `limit` — the
    /// id-cursor pagination contract shared by every listing endpoint.
    fn paginate<'a, T>(items: impl Iterator<Item = (&'a String, T)>, limit: usize, marker: Option<&str>) -> Vec<T> {
        let mut sorted: Vec<(&'a String, T)> = items.collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted
            .into_iter()
            .filter(|(id, _)| match marker {
                Some(marker) => id.as_str() > marker,
                None => true,
            })
            .take(limit)
            .map(|(_, value)| value)
            .collect()
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn create_group(
        &self,
        tenant_id: &str,
        config: ScalingGroupConfig,
        launch_config: LaunchConfig,
        policies: Vec<PolicyInput>,
    ) -> Result<ScalingGroupManifest, CoreError> {
        let current = self.groups.iter().filter(|e| e.key().0 == tenant_id).count();
        if current >= self.quotas.max_groups {
            return Err(CoreError::ScalingGroupOverLimit {
                tenant_id: tenant_id.to_string(),
                max: self.quotas.max_groups,
            });
        }

        let group_id = ids::new_id();
        let mut state = GroupState::new(
            tenant_id.to_string(),
            group_id.clone(),
            config.name.clone(),
            self.clock.clone(),
        );
        // "If minEntities > 0, the returned manifest's state has desired
        // = minEntities and convergence is signaled".
        // Signaling the dispatcher is the caller's job — the store only
        // records the target.
        state.desired = config.min_entities;
        let snapshot = GroupStateSnapshot::from(&state);
        self.states.insert(tenant_id, &group_id, state);

        let record = GroupRecord {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.clone(),
            config,
            launch_config,
            policies: Self::assign_policy_ids(policies)
                .into_iter()
                .map(|policy| (policy.policy_id.clone(), policy))
                .collect(),
            webhooks: BTreeMap::new(),
            created_at: self.clock.now(),
        };

        let manifest = record.manifest(snapshot, true, true);
        self.groups.insert(Self::key(tenant_id, &group_id), record);

        metrics::GROUPS_TOTAL.inc();
        let policy_count = manifest.policies.as_ref().map(|p| p.len()).unwrap_or(0);
        if policy_count > 0 {
            metrics::POLICIES_TOTAL.add(policy_count as i64);
        }
        Ok(manifest)
    }

    async fn view_manifest(
        &self,
        tenant_id: &str,
        group_id: &str,
        with_policies: bool,
        with_webhooks: bool,
        get_deleting: bool,
    ) -> Result<ScalingGroupManifest, CoreError> {
        let record = self.get_visible(tenant_id, group_id, get_deleting)?;
        let snapshot = self.state_snapshot(tenant_id, group_id)?;
        Ok(record.manifest(snapshot, with_policies, with_webhooks))
    }

    async fn view_config(&self, tenant_id: &str, group_id: &str) -> Result<ScalingGroupConfig, CoreError> {
        Ok(self.get_visible(tenant_id, group_id, false)?.config.clone())
    }

    async fn view_launch_config(&self, tenant_id: &str, group_id: &str) -> Result<LaunchConfig, CoreError> {
        Ok(self.get_visible(tenant_id, group_id, false)?.launch_config.clone())
    }

    async fn view_state(&self, tenant_id: &str, group_id: &str) -> Result<GroupStateSnapshot, CoreError> {
        self.get_visible(tenant_id, group_id, false)?;
        self.state_snapshot(tenant_id, group_id)
    }

    async fn update_config(
        &self,
        tenant_id: &str,
        group_id: &str,
        patch: ScalingGroupConfigPatch,
    ) -> Result<ScalingGroupConfig, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        record.config = record.config.merged_with(patch);
        Ok(record.config.clone())
    }

    async fn update_launch_config(
        &self,
        tenant_id: &str,
        group_id: &str,
        patch: LaunchConfigPatch,
    ) -> Result<LaunchConfig, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        record.launch_config = record.launch_config.merged_with(patch);
        Ok(record.launch_config.clone())
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        group_id: &str,
        status: ScalingGroupStatus,
    ) -> Result<(), CoreError> {
        self.get_visible(tenant_id, group_id, false)?;
        let mut state = self.state_snapshot_owned(tenant_id, group_id)?;
        state.status = status;
        self.states.insert(tenant_id, group_id, state);
        Ok(())
    }

    async fn update_error_reasons(
        &self,
        tenant_id: &str,
        group_id: &str,
        reasons: Vec<String>,
    ) -> Result<(), CoreError> {
        self.get_visible(tenant_id, group_id, false)?;
        let mut state = self.state_snapshot_owned(tenant_id, group_id)?;
        state.error_reasons = reasons;
        self.states.insert(tenant_id, group_id, state);
        Ok(())
    }

    async fn create_policies(
        &self,
        tenant_id: &str,
        group_id: &str,
        policies: Vec<PolicyInput>,
    ) -> Result<Vec<Policy>, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        let current = record.policies.len();
        let new = policies.len();
        if current + new > self.quotas.max_policies_per_group {
            return Err(CoreError::PoliciesOverLimit {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
                max: self.quotas.max_policies_per_group,
                current,
                new,
            });
        }
        let created = Self::assign_policy_ids(policies);
        for policy in &created {
            record.policies.insert(policy.policy_id.clone(), policy.clone());
        }
        if !created.is_empty() {
            metrics::POLICIES_TOTAL.add(created.len() as i64);
        }
        Ok(created)
    }

    async fn update_policy(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        patch: PolicyPatch,
    ) -> Result<Policy, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        let not_found = || CoreError::NoSuchPolicy {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
            policy_id: policy_id.to_string(),
        };
        let policy = record.policies.get_mut(policy_id).ok_or_else(not_found)?;
        if let Some(name) = patch.name {
            policy.name = name;
        }
        if let Some(delta) = patch.delta {
            policy.delta = delta;
        }
        if let Some(cooldown) = patch.cooldown {
            policy.cooldown = cooldown;
        }
        if let Some(args) = patch.args {
            policy.args = args;
        }
        if let Some(schedule) = patch.schedule {
            policy.schedule = Some(schedule);
        }
        Ok(policy.clone())
    }

    async fn list_policies(
        &self,
        tenant_id: &str,
        group_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<Policy>, CoreError> {
        let record = self.get_visible(tenant_id, group_id, false)?;
        Ok(Self::paginate(
            record.policies.iter().map(|(id, policy)| (id, policy.clone())),
            limit,
            marker,
        ))
    }

    async fn get_policy(&self, tenant_id: &str, group_id: &str, policy_id: &str) -> Result<Policy, CoreError> {
        let record = self.get_visible(tenant_id, group_id, false)?;
        record
            .policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| CoreError::NoSuchPolicy {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
                policy_id: policy_id.to_string(),
            })
    }

    async fn delete_policy(&self, tenant_id: &str, group_id: &str, policy_id: &str) -> Result<(), CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        record
            .policies
            .remove(policy_id)
            .ok_or_else(|| CoreError::NoSuchPolicy {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
                policy_id: policy_id.to_string(),
            })?;
        let removed_webhooks = record.webhooks.remove(policy_id).map(|bucket| bucket.len()).unwrap_or(0);
        self.capability_index.remove_policy(tenant_id, group_id, policy_id);
        metrics::POLICIES_TOTAL.dec();
        if removed_webhooks > 0 {
            metrics::WEBHOOKS_TOTAL.sub(removed_webhooks as i64);
        }
        Ok(())
    }

    async fn create_webhooks(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhooks: Vec<WebhookInput>,
    ) -> Result<Vec<Webhook>, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        if !record.policies.contains_key(policy_id) {
            return Err(CoreError::NoSuchPolicy {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
                policy_id: policy_id.to_string(),
            });
        }

        let bucket = record.webhooks.entry(policy_id.to_string()).or_default();
        let current = bucket.len();
        let new = webhooks.len();
        if current + new > self.quotas.max_webhooks_per_policy {
            return Err(CoreError::WebhooksOverLimit {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
                policy_id: policy_id.to_string(),
                max: self.quotas.max_webhooks_per_policy,
                current,
                new,
            });
        }

        let mut created = Vec::with_capacity(webhooks.len());
        for input in webhooks {
            let hash = ids::new_capability_hash();
            let webhook = Webhook {
                webhook_id: ids::new_id(),
                policy_id: policy_id.to_string(),
                name: input.name,
                metadata: input.metadata,
                capability: Capability {
                    hash: hash.clone(),
                    version: CAPABILITY_VERSION,
                },
            };
            self.capability_index.insert(
                hash,
                CapabilityTarget {
                    tenant_id: tenant_id.to_string(),
                    group_id: group_id.to_string(),
                    policy_id: policy_id.to_string(),
                },
            );
            bucket.insert(webhook.webhook_id.clone(), webhook.clone());
            created.push(webhook);
        }
        if !created.is_empty() {
            metrics::WEBHOOKS_TOTAL.add(created.len() as i64);
        }
        Ok(created)
    }

    async fn list_webhooks(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<Webhook>, CoreError> {
        let record = self.get_visible(tenant_id, group_id, false)?;
        let bucket = record.webhooks.get(policy_id);
        Ok(match bucket {
            Some(bucket) => Self::paginate(
                bucket.iter().map(|(id, webhook)| (id, webhook.clone())),
                limit,
                marker,
            ),
            None => Vec::new(),
        })
    }

    async fn get_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
    ) -> Result<Webhook, CoreError> {
        let record = self.get_visible(tenant_id, group_id, false)?;
        let not_found = || CoreError::NoSuchWebhook {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
            policy_id: policy_id.to_string(),
            webhook_id: webhook_id.to_string(),
        };
        record
            .webhooks
            .get(policy_id)
            .and_then(|bucket| bucket.get(webhook_id))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn update_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
        patch: WebhookPatch,
    ) -> Result<Webhook, CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        let not_found = || CoreError::NoSuchWebhook {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
            policy_id: policy_id.to_string(),
            webhook_id: webhook_id.to_string(),
        };
        let webhook = record
            .webhooks
            .get_mut(policy_id)
            .and_then(|bucket| bucket.get_mut(webhook_id))
            .ok_or_else(not_found)?;
        if let Some(name) = patch.name {
            webhook.name = name;
        }
        if let Some(metadata) = patch.metadata {
            webhook.metadata = metadata;
        }
        Ok(webhook.clone())
    }

    async fn delete_webhook(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
        webhook_id: &str,
    ) -> Result<(), CoreError> {
        let mut record = self.get_visible_mut(tenant_id, group_id)?;
        let not_found = || CoreError::NoSuchWebhook {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
            policy_id: policy_id.to_string(),
            webhook_id: webhook_id.to_string(),
        };
        let removed = record
            .webhooks
            .get_mut(policy_id)
            .and_then(|bucket| bucket.remove(webhook_id))
            .ok_or_else(not_found)?;
        self.capability_index.remove(&removed.capability.hash);
        metrics::WEBHOOKS_TOTAL.dec();
        Ok(())
    }

    async fn delete_group(&self, tenant_id: &str, group_id: &str) -> Result<(), CoreError> {
        let record = self.get_visible_mut(tenant_id, group_id)?;
        let policy_count = record.policies.len();
        let webhook_count: usize = record.webhooks.values().map(|bucket| bucket.len()).sum();
        drop(record);

        let mut state = self.state_snapshot_owned(tenant_id, group_id)?;
        let capacity = state.get_capacity();
        if capacity.current_capacity + capacity.pending_capacity > 0 {
            return Err(CoreError::GroupNotEmpty {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            });
        }
        state.status = ScalingGroupStatus::Deleting;
        self.states.insert(tenant_id, group_id, state);

        metrics::GROUPS_TOTAL.dec();
        if policy_count > 0 {
            metrics::POLICIES_TOTAL.sub(policy_count as i64);
        }
        if webhook_count > 0 {
            metrics::WEBHOOKS_TOTAL.sub(webhook_count as i64);
        }
        Ok(())
    }

    async fn list_groups(
        &self,
        tenant_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<ScalingGroupManifest>, CoreError> {
        let mut sorted: Vec<String> = self
            .groups
            .iter()
            .filter(|e| {
                e.key().0 == tenant_id
                    && self.states.get(tenant_id, &e.key().1).map(|s| s.status) != Some(ScalingGroupStatus::Deleting)
            })
            .map(|e| e.key().1.clone())
            .collect();
        sorted.sort();
        let page = sorted
            .into_iter()
            .filter(|id| match marker {
                Some(marker) => id.as_str() > marker,
                None => true,
            })
            .take(limit);

        let mut manifests = Vec::new();
        for group_id in page {
            if let Some(record) = self.groups.get(&Self::key(tenant_id, &group_id)) {
                let snapshot = self.state_snapshot(tenant_id, &group_id)?;
                manifests.push(record.manifest(snapshot, false, false));
            }
        }
        Ok(manifests)
    }

    async fn list_scaling_group_states(
        &self,
        tenant_id: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Vec<GroupStateSnapshot>, CoreError> {
        let mut sorted: Vec<String> = self
            .groups
            .iter()
            .filter(|e| e.key().0 == tenant_id)
            .map(|e| e.key().1.clone())
            .collect();
        sorted.sort();
        let page = sorted
            .into_iter()
            .filter(|id| match marker {
                Some(marker) => id.as_str() > marker,
                None => true,
            })
            .take(limit);

        let mut states = Vec::new();
        for group_id in page {
            if self.groups.contains_key(&Self::key(tenant_id, &group_id)) {
                if let Ok(snapshot) = self.state_snapshot(tenant_id, &group_id) {
                    states.push(snapshot);
                }
            }
        }
        Ok(states)
    }

    async fn get_counts(&self, tenant_id: &str) -> GroupCounts {
        let mut counts = GroupCounts::default();
        for entry in self.groups.iter().filter(|e| e.key().0 == tenant_id) {
            counts.groups += 1;
            counts.policies += entry.value().policies.len();
            counts.webhooks += entry.value().webhooks.values().map(|b| b.len()).sum::<usize>();
        }
        counts
    }

    async fn health_check(&self) -> (bool, serde_json::Value) {
        (
            true,
            serde_json::json!({ "total_groups": self.groups.len() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::{PolicyDelta, PolicyType};
    use serde_json::Map as JsonMap;

    fn store() -> InMemoryGroupStore {
        let clock = ClockHandle::new(FixedClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        InMemoryGroupStore::new(
            Arc::new(StateTable::new()),
            Arc::new(CapabilityIndex::new()),
            Quotas {
                max_groups: 2,
                max_policies_per_group: 2,
                max_webhooks_per_policy: 2,
            },
            clock,
        )
    }

    fn config(min: u32, max: u32) -> ScalingGroupConfig {
        ScalingGroupConfig {
            name: "web-fleet".to_string(),
            min_entities: min,
            max_entities: max,
            cooldown: 60,
            metadata: JsonMap::new(),
        }
    }

    fn launch() -> LaunchConfig {
        LaunchConfig {
            launch_type: "launch_server".to_string(),
            args: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn create_then_delete_empty_group_succeeds() {
        let store = store();
        let manifest = store
            .create_group("t1", config(0, 10), launch(), vec![])
            .await
            .unwrap();
        store.delete_group("t1", &manifest.id).await.unwrap();
        let err = store.view_manifest("t1", &manifest.id, false, false, false).await;
        assert!(matches!(err, Err(CoreError::NoSuchGroup { .. })));
    }

    #[tokio::test]
    async fn delete_non_empty_group_fails() {
        let store = store();
        let manifest = store
            .create_group("t1", config(1, 10), launch(), vec![])
            .await
            .unwrap();
        {
            let mut state = store.states.get("t1", &manifest.id).unwrap();
            state.add_active("srv-1", Default::default());
            store.states.insert("t1", &manifest.id, state);
        }
        let err = store.delete_group("t1", &manifest.id).await;
        assert!(matches!(err, Err(CoreError::GroupNotEmpty { .. })));
    }

    #[tokio::test]
    async fn create_group_over_limit_fails() {
        let store = store();
        store.create_group("t1", config(0, 10), launch(), vec![]).await.unwrap();
        store.create_group("t1", config(0, 10), launch(), vec![]).await.unwrap();
        let err = store.create_group("t1", config(0, 10), launch(), vec![]).await;
        assert!(matches!(err, Err(CoreError::ScalingGroupOverLimit { .. })));
    }

    #[tokio::test]
    async fn policy_and_webhook_lifecycle_round_trips() {
        let store = store();
        let manifest = store
            .create_group("t1", config(0, 10), launch(), vec![])
            .await
            .unwrap();
        let policies = store
            .create_policies(
                "t1",
                &manifest.id,
                vec![PolicyInput {
                    name: "scale-up".to_string(),
                    policy_type: PolicyType::Webhook,
                    delta: PolicyDelta::Change(2),
                    cooldown: 60,
                    args: serde_json::json!({}),
                    schedule: None,
                }],
            )
            .await
            .unwrap();
        let policy_id = policies[0].policy_id.clone();

        let webhooks = store
            .create_webhooks(
                "t1",
                &manifest.id,
                &policy_id,
                vec![WebhookInput {
                    name: "primary".to_string(),
                    metadata: JsonMap::new(),
                }],
            )
            .await
            .unwrap();
        let hash = webhooks[0].capability.hash.clone();
        assert_eq!(
            store.capability_index.lookup(&hash).unwrap(),
            CapabilityTarget {
                tenant_id: "t1".to_string(),
                group_id: manifest.id.clone(),
                policy_id: policy_id.clone(),
            }
        );

        store.delete_policy("t1", &manifest.id, &policy_id).await.unwrap();
        assert!(matches!(
            store.capability_index.lookup(&hash),
            Err(CoreError::UnrecognizedCapability { .. })
        ));
        assert!(matches!(
            store.get_policy("t1", &manifest.id, &policy_id).await,
            Err(CoreError::NoSuchPolicy { .. })
        ));
    }

    #[tokio::test]
    async fn list_policies_paginates_in_ascending_id_order() {
        let store = store();
        let manifest = store
            .create_group("t1", config(0, 10), launch(), vec![])
            .await
            .unwrap();
        store
            .create_policies(
                "t1",
                &manifest.id,
                vec![
                    PolicyInput {
                        name: "a".to_string(),
                        policy_type: PolicyType::Webhook,
                        delta: PolicyDelta::Change(1),
                        cooldown: 0,
                        args: serde_json::json!({}),
                        schedule: None,
                    },
                    PolicyInput {
                        name: "b".to_string(),
                        policy_type: PolicyType::Webhook,
                        delta: PolicyDelta::Change(1),
                        cooldown: 0,
                        args: serde_json::json!({}),
                        schedule: None,
                    },
                ],
            )
            .await
            .unwrap();

        let first_page = store.list_policies("t1", &manifest.id, 1, None).await.unwrap();
        assert_eq!(first_page.len(), 1);
        let second_page = store
            .list_policies("t1", &manifest.id, 1, Some(&first_page[0].policy_id))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);
        assert_ne!(first_page[0].policy_id, second_page[0].policy_id);
    }

    #[tokio::test]
    async fn view_manifest_hides_deleting_group_unless_requested() {
        let store = store();
        let manifest = store
            .create_group("t1", config(0, 10), launch(), vec![])
            .await
            .unwrap();
        store.delete_group("t1", &manifest.id).await.unwrap();

        assert!(matches!(
            store.view_manifest("t1", &manifest.id, false, false, false).await,
            Err(CoreError::NoSuchGroup { .. })
        ));
        assert!(store
            .view_manifest("t1", &manifest.id, false, false, true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn get_counts_reflects_policies_and_webhooks() {
        let store = store();
        let manifest = store
            .create_group("t1", config(0, 10), launch(), vec![])
            .await
            .unwrap();
        let policies = store
            .create_policies(
                "t1",
                &manifest.id,
                vec![PolicyInput {
                    name: "a".to_string(),
                    policy_type: PolicyType::Webhook,
                    delta: PolicyDelta::Change(1),
                    cooldown: 0,
                    args: serde_json::json!({}),
                    schedule: None,
                }],
            )
            .await
            .unwrap();
        store
            .create_webhooks(
                "t1",
                &manifest.id,
                &policies[0].policy_id,
                vec![WebhookInput {
                    name: "hook".to_string(),
                    metadata: JsonMap::new(),
                }],
            )
            .await
            .unwrap();

        let counts = store.get_counts("t1").await;
        assert_eq!(counts.groups, 1);
        assert_eq!(counts.policies, 1);
        assert_eq!(counts.webhooks, 1);
    }
}
