//! Wire/persistent data types for scaling groups, policies and webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;

use crate::group_state::GroupStateSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingGroupConfig {
    pub name: String,
    pub min_entities: u32,
    pub max_entities: u32,
    /// Group-level cooldown in seconds.
    pub cooldown: u32,
    #[serde(default)]
    pub metadata: JsonMap<String, serde_json::Value>,
}

impl ScalingGroupConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entities < self.min_entities {
            return Err(format!(
                "maxEntities ({}) must be >= minEntities ({})",
                self.max_entities, self.min_entities
            ));
        }
        Ok(())
    }

    /// Merges `patch` onto `self`, keeping fields `patch` omits
    /// (resolves the "merge vs replace" open question — see DESIGN.md).
    pub fn merged_with(&self, patch: ScalingGroupConfigPatch) -> Self {
        Self {
            name: patch.name.unwrap_or_else(|| self.name.clone()),
            min_entities: patch.min_entities.unwrap_or(self.min_entities),
            max_entities: patch.max_entities.unwrap_or(self.max_entities),
            cooldown: patch.cooldown.unwrap_or(self.cooldown),
            metadata: patch.metadata.unwrap_or_else(|| self.metadata.clone()),
        }
    }
}

/// A partial `ScalingGroupConfig` update; `None` fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalingGroupConfigPatch {
    pub name: Option<String>,
    pub min_entities: Option<u32>,
    pub max_entities: Option<u32>,
    pub cooldown: Option<u32>,
    pub metadata: Option<JsonMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub launch_type: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaunchConfigPatch {
    pub launch_type: Option<String>,
    pub args: Option<serde_json::Value>,
}

impl LaunchConfig {
    pub fn merged_with(&self, patch: LaunchConfigPatch) -> Self {
        Self {
            launch_type: patch.launch_type.unwrap_or_else(|| self.launch_type.clone()),
            args: patch.args.unwrap_or_else(|| self.args.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyType {
    Webhook,
    Schedule,
}

/// The amount by which a fired policy shifts `desired`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyDelta {
    Change(i64),
    ChangePercent(f64),
    DesiredCapacity(u32),
}

impl PolicyDelta {
    /// Applies this delta to `current`, producing the raw (unclamped)
    /// target capacity.
    pub fn apply(&self, current: u32) -> i64 {
        match self {
            PolicyDelta::Change(delta) => current as i64 + delta,
            PolicyDelta::ChangePercent(pct) => {
                let shift = (current as f64 * pct / 100.0).round() as i64;
                current as i64 + shift
            }
            PolicyDelta::DesiredCapacity(target) => *target as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleSpec {
    Cron(String),
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    pub policy_type: PolicyType,
    pub delta: PolicyDelta,
    pub cooldown: u32,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

/// Fields needed to create a policy; the store assigns `policy_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInput {
    pub name: String,
    pub policy_type: PolicyType,
    pub delta: PolicyDelta,
    pub cooldown: u32,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub delta: Option<PolicyDelta>,
    pub cooldown: Option<u32>,
    pub args: Option<serde_json::Value>,
    pub schedule: Option<ScheduleSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub hash: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub webhook_id: String,
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: JsonMap<String, serde_json::Value>,
    pub capability: Capability,
}

/// Fields needed to create a webhook; the store assigns `webhook_id` and
/// the capability hash.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookInput {
    pub name: String,
    #[serde(default)]
    pub metadata: JsonMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPatch {
    pub name: Option<String>,
    pub metadata: Option<JsonMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalingGroupManifest {
    pub id: String,
    pub config: ScalingGroupConfig,
    pub launch_config: LaunchConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<Policy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<std::collections::BTreeMap<String, Vec<Webhook>>>,
    pub state: GroupStateSnapshot,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validate_rejects_max_below_min() {
        let cfg = ScalingGroupConfig {
            name: "g".into(),
            min_entities: 5,
            max_entities: 1,
            cooldown: 60,
            metadata: JsonMap::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_merge_only_touches_supplied_fields() {
        let cfg = ScalingGroupConfig {
            name: "web".into(),
            min_entities: 1,
            max_entities: 10,
            cooldown: 60,
            metadata: JsonMap::new(),
        };
        let patched = cfg.merged_with(ScalingGroupConfigPatch {
            max_entities: Some(20),
            ..Default::default()
        });
        assert_eq!(patched.max_entities, 20);
        assert_eq!(patched.min_entities, 1);
        assert_eq!(patched.name, "web");
    }

    #[test]
    fn delta_change_percent_rounds_to_nearest() {
        let delta = PolicyDelta::ChangePercent(50.0);
        assert_eq!(delta.apply(4), 6);
    }

    #[test]
    fn delta_desired_capacity_ignores_current() {
        let delta = PolicyDelta::DesiredCapacity(7);
        assert_eq!(delta.apply(100), 7);
    }
}
