//! Policy Execution Path: the three entry points that
//! fire a policy — anonymous webhook, authenticated execute, and
//! scheduled drain — all converge on the same clamp/cooldown/mutate
//! sequence.

use std::sync::Arc;

use tracing::info;

use crate::error::CoreError;
use crate::group_state::GroupState;
use crate::metrics::POLICY_EXECUTIONS;
use crate::store::capability_index::CapabilityIndex;
use crate::store::group_store::GroupStore;
use crate::store::mutation::MutationEngine;
use crate::types::PolicyDelta;

/// Outcome of an execution attempt. Cooldown skips are a distinct,
/// non-error result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Applied { previous_desired: u32, new_desired: u32 },
    CooldownSkipped,
}

pub struct PolicyExecutor<S: GroupStore> {
    store: Arc<S>,
    mutation: Arc<MutationEngine>,
    capability_index: Arc<CapabilityIndex>,
}

impl<S: GroupStore> PolicyExecutor<S> {
    pub fn new(store: Arc<S>, mutation: Arc<MutationEngine>, capability_index: Arc<CapabilityIndex>) -> Self {
        Self {
            store,
            mutation,
            capability_index,
        }
    }

    /// Entry point 1: anonymous webhook fire.
    /// Resolves `capability_hash` through the Capability Index, then
    /// executes the policy it points at.
    pub async fn execute_via_webhook(&self, capability_hash: &str) -> Result<ExecutionOutcome, CoreError> {
        let target = self.capability_index.lookup(capability_hash)?;
        self.execute(&target.tenant_id, &target.group_id, &target.policy_id).await
    }

    /// Entry points 2 and 3 share this body: authenticated execute and
    /// scheduled drain both call straight into `execute`, bypassing the
    /// Capability Index.
    pub async fn execute(
        &self,
        tenant_id: &str,
        group_id: &str,
        policy_id: &str,
    ) -> Result<ExecutionOutcome, CoreError> {
        let config = self.store.view_config(tenant_id, group_id).await?;
        let policy = self.store.get_policy(tenant_id, group_id, policy_id).await?;

        let policy_id_owned = policy_id.to_string();
        let outcome_cell: Arc<parking_lot::Mutex<ExecutionOutcome>> =
            Arc::new(parking_lot::Mutex::new(ExecutionOutcome::CooldownSkipped));
        let outcome_cell_for_closure = outcome_cell.clone();

        self.mutation
            .modify_state(tenant_id, group_id, move |state: &GroupState| {
                if state.is_paused_or_suspended() {
                    return Ok(state.clone());
                }

                let group_cooldown_elapsed = state
                    .seconds_since_group_touch()
                    .map(|elapsed| elapsed >= config.cooldown as i64)
                    .unwrap_or(true);
                let policy_cooldown_elapsed = state
                    .seconds_since_policy_touch(&policy_id_owned)
                    .map(|elapsed| elapsed >= policy.cooldown as i64)
                    .unwrap_or(true);

                if !group_cooldown_elapsed || !policy_cooldown_elapsed {
                    *outcome_cell_for_closure.lock() = ExecutionOutcome::CooldownSkipped;
                    return Ok(state.clone());
                }

                let previous_desired = state.desired;
                let raw_target = policy.delta.apply(previous_desired);
                let clamped = raw_target.clamp(config.min_entities as i64, config.max_entities as i64) as u32;

                let mut next = state.clone();
                next.desired = clamped;
                next.mark_executed(&policy_id_owned);

                *outcome_cell_for_closure.lock() = ExecutionOutcome::Applied {
                    previous_desired,
                    new_desired: clamped,
                };

                Ok(next)
            })
            .await?;

        let outcome = outcome_cell.lock().clone();
        match &outcome {
            ExecutionOutcome::Applied { previous_desired, new_desired } => {
                POLICY_EXECUTIONS.with_label_values(&["applied"]).inc();
                info!(
                    tenant_id,
                    group_id,
                    policy_id,
                    previous_desired,
                    new_desired,
                    "policy_executed"
                );
            }
            ExecutionOutcome::CooldownSkipped => {
                POLICY_EXECUTIONS.with_label_values(&["cooldown_skipped"]).inc();
                info!(tenant_id, group_id, policy_id, "policy_cooldown_skipped");
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockHandle, FixedClock};
    use crate::store::group_store::{InMemoryGroupStore, Quotas};
    use crate::store::mutation::StateTable;
    use crate::lock::InProcessGroupLock;
    use crate::types::{LaunchConfig, PolicyInput, PolicyType, ScalingGroupConfig, WebhookInput};
    use serde_json::Map as JsonMap;
    use std::time::Duration;

    async fn fixture() -> (
        PolicyExecutor<InMemoryGroupStore>,
        Arc<InMemoryGroupStore>,
        Arc<StateTable>,
        String,
        String,
        FixedClock,
    ) {
        let clock_inner = FixedClock::new("2024-01-01T00:00:00Z".parse().unwrap());
        let clock = ClockHandle::new(clock_inner);
        let capability_index = Arc::new(CapabilityIndex::new());
        let states = Arc::new(StateTable::new());
        let store = Arc::new(InMemoryGroupStore::new(
            states.clone(),
            capability_index.clone(),
            Quotas {
                max_groups: 10,
                max_policies_per_group: 10,
                max_webhooks_per_policy: 10,
            },
            clock.clone(),
        ));
        let mutation = Arc::new(MutationEngine::new(
            Arc::new(InProcessGroupLock::new()),
            states.clone(),
            Duration::from_secs(5),
        ));

        let manifest = store
            .create_group(
                "t1",
                ScalingGroupConfig {
                    name: "web-fleet".into(),
                    min_entities: 0,
                    max_entities: 10,
                    cooldown: 60,
                    metadata: JsonMap::new(),
                },
                LaunchConfig {
                    launch_type: "launch_server".into(),
                    args: serde_json::json!({}),
                },
                vec![],
            )
            .await
            .unwrap();

        let policies = store
            .create_policies(
                "t1",
                &manifest.id,
                vec![PolicyInput {
                    name: "scale-up".into(),
                    policy_type: PolicyType::Webhook,
                    delta: PolicyDelta::Change(2),
                    cooldown: 60,
                    args: serde_json::json!({}),
                    schedule: None,
                }],
            )
            .await
            .unwrap();

        let state = GroupState::new("t1".into(), manifest.id.clone(), "web-fleet".into(), clock);
        states.insert("t1", &manifest.id, state);

        let executor = PolicyExecutor::new(store.clone(), mutation, capability_index);
        (executor, store, states, manifest.id, policies[0].policy_id.clone(), FixedClock::new("2024-01-01T00:00:00Z".parse().unwrap()))
    }

    #[tokio::test]
    async fn execute_applies_delta_within_clamp() {
        let (executor, _store, states, group_id, policy_id, _clock) = fixture().await;
        let outcome = executor.execute("t1", &group_id, &policy_id).await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Applied { previous_desired: 0, new_desired: 2 }
        );
    }

    #[tokio::test]
    async fn second_execution_within_cooldown_is_skipped() {
        let (executor, _store, _states, group_id, policy_id, _clock) = fixture().await;
        executor.execute("t1", &group_id, &policy_id).await.unwrap();
        let second = executor.execute("t1", &group_id, &policy_id).await.unwrap();
        assert_eq!(second, ExecutionOutcome::CooldownSkipped);
    }

    #[tokio::test]
    async fn execute_via_webhook_resolves_capability_hash() {
        let (executor, store, _states, group_id, policy_id, _clock) = fixture().await;
        let webhooks = store
            .create_webhooks(
                "t1",
                &group_id,
                &policy_id,
                vec![WebhookInput {
                    name: "primary".into(),
                    metadata: JsonMap::new(),
                }],
            )
            .await
            .unwrap();

        let outcome = executor
            .execute_via_webhook(&webhooks[0].capability.hash)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Applied { previous_desired: 0, new_desired: 2 }
        );
    }

    #[tokio::test]
    async fn execute_via_unknown_hash_is_unrecognized() {
        let (executor, _store, _states, _group_id, _policy_id, _clock) = fixture().await;
        let err = executor.execute_via_webhook("never-issued").await;
        assert!(matches!(err, Err(CoreError::UnrecognizedCapability { .. })));
    }
}
