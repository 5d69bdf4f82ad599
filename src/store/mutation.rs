//! Mutation Engine: the single point through which
//! `GroupState` is ever mutated. Wraps a closure in a per-group lock,
//! enforces the `DELETING`-is-terminal rule, and publishes the result
//! atomically.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::CoreError;
use crate::group_state::{GroupState, ScalingGroupStatus};
use crate::lock::GroupLock;

/// Holds every group's live `GroupState`, keyed by `(tenant_id,
/// group_id)`. Kept separate from the Group Store's catalog metadata:
/// `modify_state` only ever touches this table, never policies/webhooks,
/// so it can be locked independently of catalog CRUD.
#[derive(Default)]
pub struct StateTable {
    states: DashMap<(String, String), GroupState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: &str, group_id: &str, state: GroupState) {
        self.states.insert((tenant_id.to_string(), group_id.to_string()), state);
    }

    pub fn remove(&self, tenant_id: &str, group_id: &str) {
        self.states.remove(&(tenant_id.to_string(), group_id.to_string()));
    }

    /// Snapshot read outside the Mutation Engine's lock, for the Group
    /// Store's `view_state`/`view_manifest`/status-update plumbing.
    pub fn get(&self, tenant_id: &str, group_id: &str) -> Option<GroupState> {
        self.states
            .get(&(tenant_id.to_string(), group_id.to_string()))
            .map(|entry| entry.clone())
    }
}

pub struct MutationEngine {
    lock: Arc<dyn GroupLock>,
    states: Arc<StateTable>,
    build_timeout: Duration,
}

impl MutationEngine {
    pub fn new(lock: Arc<dyn GroupLock>, states: Arc<StateTable>, build_timeout: Duration) -> Self {
        Self {
            lock,
            states,
            build_timeout,
        }
    }

    /// Runs `f` against the latest persisted state for `(tenant_id,
    /// group_id)`, under the group's exclusive lock. `f` returning `Err`
    /// leaves state untouched; `f` returning `Ok(new_state)` publishes it
    /// atomically.
    ///
    /// `f` must be idempotent with respect to any external side effects
    /// it performs, since lock contention may force a caller to retry
    /// the whole operation.
    pub async fn modify_state<F>(&self, tenant_id: &str, group_id: &str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&GroupState) -> Result<GroupState, CoreError> + Send,
    {
        let _guard = self.lock.acquire(group_id, self.build_timeout).await?;

        let key = (tenant_id.to_string(), group_id.to_string());
        let current = self
            .states
            .states
            .get(&key)
            .ok_or_else(|| CoreError::NoSuchGroup {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            })?;

        // Deleting is terminal: modify_state fails before invoking f.
        if current.status == ScalingGroupStatus::Deleting {
            return Err(CoreError::NoSuchGroup {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            });
        }

        let new_state = f(&current)?;
        drop(current);
        self.states.states.insert(key, new_state);
        Ok(())
    }

    /// Same contract as `modify_state`, but `f` is async — needed when
    /// the mutation closure must itself await an external collaborator
    /// (the convergence dispatcher's `converge()` call) while still
    /// holding the group lock for the duration.
    pub async fn modify_state_async<F, Fut>(&self, tenant_id: &str, group_id: &str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(GroupState) -> Fut + Send,
        Fut: std::future::Future<Output = Result<GroupState, CoreError>> + Send,
    {
        let _guard = self.lock.acquire(group_id, self.build_timeout).await?;

        let key = (tenant_id.to_string(), group_id.to_string());
        let current = self
            .states
            .states
            .get(&key)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::NoSuchGroup {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            })?;

        if current.status == ScalingGroupStatus::Deleting {
            return Err(CoreError::NoSuchGroup {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            });
        }

        let new_state = f(current).await?;
        self.states.states.insert(key, new_state);
        Ok(())
    }
}
