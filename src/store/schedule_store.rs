//! Schedule Store: `B` independent buckets of future
//! policy-fire events, drained by `B` scheduler workers without
//! contending on each other. `add` is a lockless upsert; `fetch_and_delete`
//! is the only operation that must be atomic per bucket.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::ids;

#[derive(Debug, Clone)]
pub enum ScheduleKind {
    Cron(String),
    At,
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event_id: String,
    pub trigger_time: DateTime<Utc>,
    pub bucket: u32,
    pub tenant_id: String,
    pub group_id: String,
    pub policy_id: String,
    pub version: u32,
    pub kind: ScheduleKind,
}

/// What a caller supplies when scheduling a new event; `bucket` is
/// assigned by the store unless the caller pins one.
pub struct NewEvent {
    pub tenant_id: String,
    pub group_id: String,
    pub policy_id: String,
    pub version: u32,
    pub kind: ScheduleSpecInput,
    pub bucket: Option<u32>,
}

pub enum ScheduleSpecInput {
    Cron(String),
    At(DateTime<Utc>),
}

/// Computes the next strictly-future occurrence of a 5-field cron
/// expression after `now`, matching the original's `croniter`-based
/// helper. The `cron` crate expects a leading seconds field, so a
/// standard 5-field expression is adapted by pinning seconds to `0`.
pub fn next_cron_occurrence(cron_expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let six_field = format!("0 {cron_expr}");
    let schedule = Schedule::from_str(&six_field).map_err(|e| CoreError::UpstreamError {
        system: "scheduler".to_string(),
        operation: "parse_cron".to_string(),
        url: cron_expr.to_string(),
        cause: crate::error::UpstreamCause {
            code: None,
            body: Some(e.to_string()),
            headers: None,
        },
    })?;
    schedule
        .after(&now)
        .next()
        .ok_or_else(|| CoreError::UpstreamError {
            system: "scheduler".to_string(),
            operation: "next_cron_occurrence".to_string(),
            url: cron_expr.to_string(),
            cause: crate::error::UpstreamCause {
                code: None,
                body: None,
                headers: None,
            },
        })
}

fn bucket_for(policy_id: &str, buckets: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    policy_id.hash(&mut hasher);
    (hasher.finish() % buckets as u64) as u32
}

pub struct ScheduleStore {
    buckets: Vec<Mutex<BTreeMap<(DateTime<Utc>, String), ScheduledEvent>>>,
}

impl ScheduleStore {
    pub fn new(bucket_count: u32) -> Self {
        let mut buckets = Vec::with_capacity(bucket_count as usize);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(BTreeMap::new()));
        }
        Self { buckets }
    }

    pub fn bucket_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Inserts each event into its assigned (or computed) bucket. Cron
    /// events get `trigger_time = next_cron_occurrence(cron, now)`.
    pub async fn add_events(&self, events: Vec<NewEvent>, now: DateTime<Utc>) -> Result<Vec<String>, CoreError> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let bucket_count = self.bucket_count();
            let bucket = event.bucket.unwrap_or_else(|| bucket_for(&event.policy_id, bucket_count));

            let (trigger_time, kind) = match event.kind {
                ScheduleSpecInput::Cron(expr) => (next_cron_occurrence(&expr, now)?, ScheduleKind::Cron(expr)),
                ScheduleSpecInput::At(at) => (at, ScheduleKind::At),
            };

            let event_id = ids::new_id();
            let scheduled = ScheduledEvent {
                event_id: event_id.clone(),
                trigger_time,
                bucket,
                tenant_id: event.tenant_id,
                group_id: event.group_id,
                policy_id: event.policy_id,
                version: event.version,
                kind,
            };

            let mut guard = self.buckets[bucket as usize].lock().await;
            guard.insert((trigger_time, event_id.clone()), scheduled);
            ids.push(event_id);
        }
        Ok(ids)
    }

    /// Atomically removes up to `size` events from `bucket` whose
    /// `trigger_time <= now`. Two concurrent callers on the same bucket
    /// never observe overlapping sets, because the whole scan-and-remove
    /// happens under the bucket's mutex.
    pub async fn fetch_and_delete(&self, bucket: u32, now: DateTime<Utc>, size: usize) -> Vec<ScheduledEvent> {
        let mut guard = self.buckets[bucket as usize].lock().await;
        let due_keys: Vec<(DateTime<Utc>, String)> = guard
            .range(..=(now, String::from('\u{10FFFF}')))
            .take(size)
            .map(|(key, _)| key.clone())
            .collect();
        due_keys
            .into_iter()
            .filter_map(|key| guard.remove(&key))
            .collect()
    }

    /// Monitoring hook: returns the earliest event without removing it.
    pub async fn get_oldest_event(&self, bucket: u32) -> Option<ScheduledEvent> {
        let guard = self.buckets[bucket as usize].lock().await;
        guard.values().next().cloned()
    }

    pub fn bucket_for_policy(&self, policy_id: &str) -> u32 {
        bucket_for(policy_id, self.bucket_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(event: &ScheduledEvent) -> DateTime<Utc> {
        event.trigger_time
    }

    #[tokio::test]
    async fn add_then_fetch_and_delete_returns_due_event_exactly_once() {
        let store = ScheduleStore::new(4);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .add_events(
                vec![NewEvent {
                    tenant_id: "t1".into(),
                    group_id: "g1".into(),
                    policy_id: "p1".into(),
                    version: 1,
                    kind: ScheduleSpecInput::At(now),
                    bucket: Some(0),
                }],
                now,
            )
            .await
            .unwrap();

        let fetched = store.fetch_and_delete(0, now, 10).await;
        assert_eq!(fetched.len(), 1);
        assert!(store.fetch_and_delete(0, now, 10).await.is_empty());
    }

    #[tokio::test]
    async fn fetch_and_delete_ignores_events_not_yet_due() {
        let store = ScheduleStore::new(1);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let future = now + chrono::Duration::hours(1);
        store
            .add_events(
                vec![NewEvent {
                    tenant_id: "t1".into(),
                    group_id: "g1".into(),
                    policy_id: "p1".into(),
                    version: 1,
                    kind: ScheduleSpecInput::At(future),
                    bucket: Some(0),
                }],
                now,
            )
            .await
            .unwrap();

        assert!(store.fetch_and_delete(0, now, 10).await.is_empty());
        assert_eq!(store.fetch_and_delete(0, future, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetch_and_delete_never_double_delivers() {
        let store = std::sync::Arc::new(ScheduleStore::new(1));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut events = Vec::new();
        for i in 0..50 {
            events.push(NewEvent {
                tenant_id: "t1".into(),
                group_id: "g1".into(),
                policy_id: format!("p{i}"),
                version: 1,
                kind: ScheduleSpecInput::At(now),
                bucket: Some(0),
            });
        }
        store.add_events(events, now).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.fetch_and_delete(0, now, 5).await }));
        }
        let mut total = 0;
        let mut seen = std::collections::HashSet::new();
        for h in handles {
            for event in h.await.unwrap() {
                assert!(seen.insert(event.event_id), "event delivered more than once");
                total += 1;
            }
        }
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn get_oldest_event_does_not_remove() {
        let store = ScheduleStore::new(1);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .add_events(
                vec![NewEvent {
                    tenant_id: "t1".into(),
                    group_id: "g1".into(),
                    policy_id: "p1".into(),
                    version: 1,
                    kind: ScheduleSpecInput::At(now),
                    bucket: Some(0),
                }],
                now,
            )
            .await
            .unwrap();

        let peeked = store.get_oldest_event(0).await.unwrap();
        assert_eq!(at(&peeked), now);
        assert_eq!(store.fetch_and_delete(0, now, 10).await.len(), 1);
    }

    #[test]
    fn next_cron_occurrence_every_five_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = next_cron_occurrence("*/5 * * * *", now).unwrap();
        assert_eq!(next, now + chrono::Duration::minutes(5));
    }

    #[test]
    fn bucket_for_policy_is_stable() {
        let store = ScheduleStore::new(10);
        let a = store.bucket_for_policy("policy-1");
        let b = store.bucket_for_policy("policy-1");
        assert_eq!(a, b);
        assert!(a < 10);
    }
}
