//! Convergence Dispatcher: the periodic driver that,
//! for each group needing attention, invokes the external convergence
//! decision under the group's lock and records the outcome.
//!
//! `converge()` itself — what cloud calls to issue — is out of scope
//!; it is modeled as the `Converger` trait so this crate
//! never needs to know about load balancers or compute APIs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::error_presenter::{present_reasons, ErrorReason};
use crate::group_state::{GroupState, GroupStateSnapshot, ScalingGroupStatus};
use crate::metrics::{CONVERGENCE_CYCLES_TOTAL, CONVERGENCE_DURATION, CONVERGENCE_ERRORS_TOTAL};
use crate::store::group_store::GroupStore;
use crate::store::mutation::MutationEngine;
use crate::store::server_cache::ServerCache;

/// A convergence plan: the external step executor's input. Opaque to
/// this crate beyond its existence.
pub type ConvergencePlan = serde_json::Value;

/// The external collaborator contract: given the current state and
/// server cache snapshot, decide what to do next.
#[async_trait]
pub trait Converger: Send + Sync {
    async fn converge(
        &self,
        state: &GroupStateSnapshot,
        cached_servers: &[serde_json::Value],
    ) -> (ConvergencePlan, GroupState, Vec<ErrorReason>);
}

/// Test/placeholder converger: always succeeds with no plan and no
/// state change. A real deployment supplies its own `Converger` wired
/// to cloud compute/load-balancer clients.
pub struct NoopConverger;

#[async_trait]
impl Converger for NoopConverger {
    async fn converge(
        &self,
        _state: &GroupStateSnapshot,
        _cached_servers: &[serde_json::Value],
    ) -> (ConvergencePlan, GroupState, Vec<ErrorReason>) {
        unimplemented!("NoopConverger is a placeholder; wire a real Converger to use ConvergenceDispatcher")
    }
}

pub struct ConvergenceDispatcher<S: GroupStore, C: Converger> {
    store: Arc<S>,
    mutation: Arc<MutationEngine>,
    server_cache: Arc<ServerCache>,
    converger: Arc<C>,
    build_timeout: Duration,
}

impl<S: GroupStore, C: Converger> ConvergenceDispatcher<S, C> {
    pub fn new(
        store: Arc<S>,
        mutation: Arc<MutationEngine>,
        server_cache: Arc<ServerCache>,
        converger: Arc<C>,
        build_timeout: Duration,
    ) -> Self {
        Self {
            store,
            mutation,
            server_cache,
            converger,
            build_timeout,
        }
    }

    /// Runs the periodic loop forever at `period`, until cancelled.
    /// Each tick is bounded by `build_timeout` per group.
    pub async fn run(&self, tenant_id: &str, period: Duration) {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            self.run_once(tenant_id).await;
        }
    }

    /// Enumerates groups needing attention for `tenant_id` and
    /// converges each.
    pub async fn run_once(&self, tenant_id: &str) {
        let states = match self.store.list_scaling_group_states(tenant_id, usize::MAX, None).await {
            Ok(states) => states,
            Err(err) => {
                error!(tenant_id, error = %err, "convergence_enumerate_failed");
                return;
            }
        };

        for state in states {
            if state.status == ScalingGroupStatus::Deleting || state.paused || state.suspended {
                continue;
            }
            self.converge_one(tenant_id, &state.group_id).await;
        }
    }

    async fn converge_one(&self, tenant_id: &str, group_id: &str) {
        CONVERGENCE_CYCLES_TOTAL.inc();
        let timer = CONVERGENCE_DURATION.start_timer();

        let (servers, _last_update) = self.server_cache.get_servers(tenant_id, group_id, false);
        let converger = self.converger.clone();
        let tenant_id_owned = tenant_id.to_string();
        let group_id_owned = group_id.to_string();

        let result = timeout(
            self.build_timeout,
            self.mutation.modify_state_async(tenant_id, group_id, move |state: GroupState| async move {
                let snapshot = GroupStateSnapshot::from(&state);
                let (_plan, new_state, errors) = converger.converge(&snapshot, &servers).await;

                if !errors.is_empty() {
                    return Err(CoreError::UpstreamError {
                        system: "convergence".to_string(),
                        operation: "converge".to_string(),
                        url: format!("{tenant_id_owned}/{group_id_owned}"),
                        cause: crate::error::UpstreamCause {
                            code: None,
                            body: Some(serde_json::to_string(&present_reasons(&errors)).unwrap_or_default()),
                            headers: None,
                        },
                    });
                }
                Ok(new_state)
            }),
        )
        .await;

        timer.observe_duration();

        match result {
            Ok(Ok(())) => {
                if let Ok(state) = self.store.view_state(tenant_id, group_id).await {
                    if state.status == ScalingGroupStatus::Error {
                        let _ = self
                            .store
                            .update_status(tenant_id, group_id, ScalingGroupStatus::Active)
                            .await;
                        let _ = self.store.update_error_reasons(tenant_id, group_id, Vec::new()).await;
                        info!(tenant_id, group_id, "convergence_recovered");
                    }
                }
            }
            Ok(Err(CoreError::UpstreamError { cause, .. })) => {
                CONVERGENCE_ERRORS_TOTAL.inc();
                let reasons: Vec<String> = cause
                    .body
                    .as_deref()
                    .and_then(|body| serde_json::from_str(body).ok())
                    .unwrap_or_default();
                let _ = self
                    .store
                    .update_status(tenant_id, group_id, ScalingGroupStatus::Error)
                    .await;
                let _ = self.store.update_error_reasons(tenant_id, group_id, reasons.clone()).await;
                warn!(tenant_id, group_id, reasons = ?reasons, "convergence_error");
            }
            Ok(Err(err)) => {
                CONVERGENCE_ERRORS_TOTAL.inc();
                warn!(tenant_id, group_id, error = %err, "convergence_failed");
            }
            Err(_elapsed) => {
                CONVERGENCE_ERRORS_TOTAL.inc();
                warn!(tenant_id, group_id, timeout_secs = self.build_timeout.as_secs(), "convergence_build_timeout");
            }
        }
    }
}
