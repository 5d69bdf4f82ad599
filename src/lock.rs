//! Per-group distributed lock capability.
//!
//! The Mutation Engine needs at-most-one mutator per `(tenant_id,
//! group_id)` anywhere in the deployment. This is modeled as a
//! `GroupLock` trait so a ZooKeeper- or etcd-backed implementation is a
//! drop-in behind the same interface a production deployment would
//! configure via `AUTOSCALE_LOCK_HOSTS`. The crate ships one
//! implementation: an in-process table of async mutexes, sufficient for
//! a single-process core and for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::error::CoreError;

/// Held while a mutator runs; dropping it releases the lock. Ephemeral
/// locks expire on their own if the holder dies — the
/// in-process implementation achieves this for free because the guard is
/// tied to the task's stack.
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
pub trait GroupLock: Send + Sync {
    /// Acquires the lock for `group_id`, waiting up to `budget` before
    /// surfacing `CoreError::LockContention`.
    async fn acquire(&self, group_id: &str, budget: Duration) -> Result<LockGuard, CoreError>;
}

/// Sharded in-process mutex table keyed by `group_id`. Fair because
/// `tokio::sync::Mutex` queues waiters FIFO.
#[derive(Default)]
pub struct InProcessGroupLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InProcessGroupLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, group_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl GroupLock for InProcessGroupLock {
    async fn acquire(&self, group_id: &str, budget: Duration) -> Result<LockGuard, CoreError> {
        let mutex = self.entry(group_id);
        match timeout(budget, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockGuard { _guard: guard }),
            Err(_) => Err(CoreError::LockContention {
                group_id: group_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn excludes_concurrent_mutators_on_the_same_group() {
        let lock = Arc::new(InProcessGroupLock::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("group-1", Duration::from_secs(5)).await.unwrap();
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "two mutators ran concurrently");
    }

    #[tokio::test]
    async fn independent_groups_do_not_contend() {
        let lock = Arc::new(InProcessGroupLock::new());
        let g1 = lock.acquire("group-1", Duration::from_secs(1)).await.unwrap();
        let g2 = lock.acquire("group-2", Duration::from_secs(1)).await;
        assert!(g2.is_ok());
        drop(g1);
    }

    #[tokio::test]
    async fn contention_times_out_as_lock_contention_error() {
        let lock = Arc::new(InProcessGroupLock::new());
        let _held = lock.acquire("group-1", Duration::from_secs(1)).await.unwrap();
        let err = lock.acquire("group-1", Duration::from_millis(20)).await;
        assert!(matches!(err, Err(CoreError::LockContention { .. })));
    }
}
