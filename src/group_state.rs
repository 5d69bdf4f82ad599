//! `GroupState`: the in-memory value type capturing a scaling group's
//! runtime state. Mutated only through the Mutation Engine
//! (`store::mutation`), never directly by handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::ClockHandle;
use crate::timestamp::{self, NEVER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScalingGroupStatus {
    Active,
    Error,
    Deleting,
}

impl Default for ScalingGroupStatus {
    fn default() -> Self {
        ScalingGroupStatus::Active
    }
}

/// Opaque per-entry metadata. Kept as a JSON blob the way the original
/// Python model does (`server_info` is a free-form dict); the core never
/// interprets these fields, only stores and returns them.
pub type EntryInfo = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize)]
pub struct Capacity {
    pub current_capacity: usize,
    pub pending_capacity: usize,
    pub desired_capacity: usize,
}

/// Serializable snapshot of a `GroupState`, omitting the clock capability.
/// This is what `view_state`/manifests hand back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStateSnapshot {
    pub tenant_id: String,
    pub group_id: String,
    pub group_name: String,
    pub active: BTreeMap<String, EntryInfo>,
    pub pending: BTreeMap<String, EntryInfo>,
    pub group_touched: String,
    pub policy_touched: BTreeMap<String, String>,
    pub paused: bool,
    pub suspended: bool,
    pub status: ScalingGroupStatus,
    pub error_reasons: Vec<String>,
    pub desired: u32,
    pub capacity: Capacity,
}

impl From<&GroupState> for GroupStateSnapshot {
    fn from(state: &GroupState) -> Self {
        Self {
            tenant_id: state.tenant_id.clone(),
            group_id: state.group_id.clone(),
            group_name: state.group_name.clone(),
            active: state.active.clone(),
            pending: state.pending.clone(),
            group_touched: state.group_touched.clone(),
            policy_touched: state.policy_touched.clone(),
            paused: state.paused,
            suspended: state.suspended,
            status: state.status,
            error_reasons: state.error_reasons.clone(),
            desired: state.desired,
            capacity: state.get_capacity(),
        }
    }
}

/// Per-group runtime state. `now` is a clock capability so tests can
/// control `mark_executed`/`add_job`/`add_active` timestamps precisely.
#[derive(Clone)]
pub struct GroupState {
    pub tenant_id: String,
    pub group_id: String,
    pub group_name: String,
    pub active: BTreeMap<String, EntryInfo>,
    pub pending: BTreeMap<String, EntryInfo>,
    pub group_touched: String,
    pub policy_touched: BTreeMap<String, String>,
    pub paused: bool,
    pub suspended: bool,
    pub status: ScalingGroupStatus,
    pub error_reasons: Vec<String>,
    pub desired: u32,
    pub now: ClockHandle,
}

impl GroupState {
    pub fn new(tenant_id: String, group_id: String, group_name: String, now: ClockHandle) -> Self {
        Self {
            tenant_id,
            group_id,
            group_name,
            active: BTreeMap::new(),
            pending: BTreeMap::new(),
            group_touched: NEVER.to_string(),
            policy_touched: BTreeMap::new(),
            paused: false,
            suspended: false,
            status: ScalingGroupStatus::Active,
            error_reasons: Vec::new(),
            desired: 0,
            now,
        }
    }

    /// Adds a pending job. Panics if the job already exists — this is an
    /// invariant violation in the caller, not a recoverable
    /// error.
    pub fn add_job(&mut self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        assert!(
            !self.pending.contains_key(&job_id),
            "job already exists: {job_id}"
        );
        let mut info = EntryInfo::new();
        info.insert(
            "created".to_string(),
            serde_json::Value::String(timestamp::format(self.now.now())),
        );
        self.pending.insert(job_id, info);
    }

    /// Removes a pending job. Panics if it is not present.
    pub fn remove_job(&mut self, job_id: &str) {
        assert!(
            self.pending.remove(job_id).is_some(),
            "job does not exist: {job_id}"
        );
    }

    /// Adds a server to `active`. Panics if the server id already exists.
    /// A `created` field is injected if the caller didn't supply one.
    pub fn add_active(&mut self, server_id: impl Into<String>, mut info: EntryInfo) {
        let server_id = server_id.into();
        assert!(
            !self.active.contains_key(&server_id),
            "server already exists: {server_id}"
        );
        info.entry("created".to_string())
            .or_insert_with(|| serde_json::Value::String(timestamp::format(self.now.now())));
        self.active.insert(server_id, info);
    }

    /// Removes a server from `active`. Panics if it is not present.
    pub fn remove_active(&mut self, server_id: &str) {
        assert!(
            self.active.remove(server_id).is_some(),
            "server does not exist: {server_id}"
        );
    }

    /// Records the execution time of `policy_id`. Both `policy_touched`
    /// and `group_touched` are set to the *same* clock read.
    pub fn mark_executed(&mut self, policy_id: &str) {
        let now = timestamp::format(self.now.now());
        self.policy_touched.insert(policy_id.to_string(), now.clone());
        self.group_touched = now;
    }

    /// `true` if scheduler/convergence must not apply policies to this
    /// group.
    pub fn is_paused_or_suspended(&self) -> bool {
        self.paused || self.suspended
    }

    pub fn get_capacity(&self) -> Capacity {
        Capacity {
            current_capacity: self.active.len(),
            pending_capacity: self.pending.len(),
            desired_capacity: self.active.len() + self.pending.len(),
        }
    }

    /// Seconds since `policy_id` (or the group, if `policy_id` has never
    /// fired) was last touched. Used by cooldown checks in `policy.rs`.
    pub fn seconds_since_policy_touch(&self, policy_id: &str) -> Option<i64> {
        let touched = self.policy_touched.get(policy_id).map(String::as_str).unwrap_or(NEVER);
        self.seconds_since(touched)
    }

    pub fn seconds_since_group_touch(&self) -> Option<i64> {
        self.seconds_since(&self.group_touched)
    }

    fn seconds_since(&self, touched: &str) -> Option<i64> {
        if timestamp::is_never(touched) {
            return None;
        }
        let at = timestamp::parse(touched)?;
        Some((self.now.now() - at).num_seconds())
    }
}
