//! Scheduler workers: one task per bucket drains
//! due events and fires the policy they name, bypassing the Capability
//! Index the way an authenticated execute would. Cron events
//! self-reschedule after a successful fire *and* after a cooldown skip;
//! a one-shot `at` event is never re-added.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{info, warn};

use crate::metrics;
use crate::policy::PolicyExecutor;
use crate::store::group_store::GroupStore;
use crate::store::schedule_store::{NewEvent, ScheduleKind, ScheduleSpecInput, ScheduleStore};

/// How many events a single drain pass pulls from a bucket before
/// yielding back to the interval timer.
const DRAIN_BATCH_SIZE: usize = 50;

pub struct Scheduler<S: GroupStore> {
    schedule: Arc<ScheduleStore>,
    executor: Arc<PolicyExecutor<S>>,
}

impl<S: GroupStore> Scheduler<S> {
    pub fn new(schedule: Arc<ScheduleStore>, executor: Arc<PolicyExecutor<S>>) -> Self {
        Self { schedule, executor }
    }

    /// Spawns one worker per bucket, each polling independently at
    /// `period` so `B` scheduler workers run in parallel without
    /// contending on the same queue.
    pub fn spawn_all(self: Arc<Self>, period: Duration) -> Vec<tokio::task::JoinHandle<()>> {
        let bucket_count = self.schedule.bucket_count();
        (0..bucket_count)
            .map(|bucket| {
                let this = self.clone();
                tokio::spawn(async move { this.run_bucket(bucket, period).await })
            })
            .collect()
    }

    async fn run_bucket(&self, bucket: u32, period: Duration) {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            self.drain_bucket_once(bucket).await;
        }
    }

    /// Drains every due event in `bucket` and fires its policy. Exposed
    /// separately from `run_bucket` so tests can step one pass at a time
    /// without waiting on a real timer.
    pub async fn drain_bucket_once(&self, bucket: u32) {
        self.drain_bucket_once_at(bucket, Utc::now()).await;
    }

    /// Same as `drain_bucket_once` but with an explicit `now`, so tests
    /// can drain a bucket as of a chosen instant without needing to move
    /// the real clock.
    pub async fn drain_bucket_once_at(&self, bucket: u32, now: DateTime<Utc>) {
        let due = self.schedule.fetch_and_delete(bucket, now, DRAIN_BATCH_SIZE).await;
        if !due.is_empty() {
            metrics::SCHEDULE_EVENTS_FETCHED
                .with_label_values(&[&bucket.to_string()])
                .inc_by(due.len() as u64);
        }
        for event in due {
            let outcome = self
                .executor
                .execute(&event.tenant_id, &event.group_id, &event.policy_id)
                .await;

            match &outcome {
                Ok(_) => info!(
                    tenant_id = %event.tenant_id,
                    group_id = %event.group_id,
                    policy_id = %event.policy_id,
                    "scheduled_policy_fired"
                ),
                Err(err) => warn!(
                    tenant_id = %event.tenant_id,
                    group_id = %event.group_id,
                    policy_id = %event.policy_id,
                    error = %err,
                    "scheduled_policy_fire_failed"
                ),
            }

            // Success or cooldown skip both self-reschedule a cron event;
            // only a hard execution error leaves it undelivered this
            // round. A one-shot `at` event is never re-added.
            if let ScheduleKind::Cron(expr) = &event.kind {
                if outcome.is_ok() {
                    let result = self
                        .schedule
                        .add_events(
                            vec![NewEvent {
                                tenant_id: event.tenant_id.clone(),
                                group_id: event.group_id.clone(),
                                policy_id: event.policy_id.clone(),
                                version: event.version,
                                kind: ScheduleSpecInput::Cron(expr.clone()),
                                bucket: Some(event.bucket),
                            }],
                            now,
                        )
                        .await;
                    if let Err(err) = result {
                        warn!(policy_id = %event.policy_id, error = %err, "cron_reschedule_failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockHandle;
    use crate::group_state::GroupState;
    use crate::lock::InProcessGroupLock;
    use crate::store::capability_index::CapabilityIndex;
    use crate::store::group_store::{InMemoryGroupStore, Quotas};
    use crate::store::mutation::{MutationEngine, StateTable};
    use crate::types::{LaunchConfig, PolicyDelta, PolicyInput, PolicyType, ScalingGroupConfig};
    use serde_json::Map as JsonMap;

    async fn fixture() -> (Arc<Scheduler<InMemoryGroupStore>>, Arc<InMemoryGroupStore>, String, String) {
        let clock = ClockHandle::system();
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
                    cooldown: 0,
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
        states.insert(
            "t1",
            &manifest.id,
            GroupState::new("t1".into(), manifest.id.clone(), "web-fleet".into(), clock),
        );

        let policies = store
            .create_policies(
                "t1",
                &manifest.id,
                vec![PolicyInput {
                    name: "scheduled-scale-up".into(),
                    policy_type: PolicyType::Schedule,
                    delta: PolicyDelta::Change(2),
                    cooldown: 0,
                    args: serde_json::json!({}),
                    schedule: None,
                }],
            )
            .await
            .unwrap();

        let executor = Arc::new(PolicyExecutor::new(store.clone(), mutation, capability_index));
        let schedule = Arc::new(ScheduleStore::new(4));
        let scheduler = Arc::new(Scheduler::new(schedule, executor));
        (scheduler, store, manifest.id, policies[0].policy_id.clone())
    }

    #[tokio::test]
    async fn draining_a_cron_event_fires_the_policy_and_reschedules() {
        let (scheduler, store, group_id, policy_id) = fixture().await;
        let now = Utc::now();
        let bucket = scheduler.schedule.bucket_for_policy(&policy_id);
        scheduler
            .schedule
            .add_events(
                vec![NewEvent {
                    tenant_id: "t1".into(),
                    group_id: group_id.clone(),
                    policy_id: policy_id.clone(),
                    version: 1,
                    kind: ScheduleSpecInput::Cron("*/5 * * * *".into()),
                    bucket: Some(bucket),
                }],
                now,
            )
            .await
            .unwrap();

        // Drain as of the event's own trigger time, so the test doesn't
        // depend on wall-clock timing.
        let peeked = scheduler.schedule.get_oldest_event(bucket).await.unwrap();
        let due_at = peeked.trigger_time;

        scheduler.drain_bucket_once_at(bucket, due_at).await;

        let state = store.view_state("t1", &group_id).await.unwrap();
        assert_eq!(state.desired, 2);

        // A fresh occurrence should have been re-added to the same bucket.
        let requeued = scheduler.schedule.get_oldest_event(bucket).await;
        assert!(requeued.is_some());
        assert!(requeued.unwrap().trigger_time > due_at);
    }

    #[tokio::test]
    async fn draining_an_at_event_does_not_reschedule() {
        let (scheduler, store, group_id, policy_id) = fixture().await;
        let now = Utc::now();
        let bucket = scheduler.schedule.bucket_for_policy(&policy_id);
        scheduler
            .schedule
            .add_events(
                vec![NewEvent {
                    tenant_id: "t1".into(),
                    group_id: group_id.clone(),
                    policy_id: policy_id.clone(),
                    version: 1,
                    kind: ScheduleSpecInput::At(now),
                    bucket: Some(bucket),
                }],
                now,
            )
            .await
            .unwrap();

        scheduler.drain_bucket_once(bucket).await;

        let state = store.view_state("t1", &group_id).await.unwrap();
        assert_eq!(state.desired, 2);
        assert!(scheduler.schedule.get_oldest_event(bucket).await.is_none());
    }
}
