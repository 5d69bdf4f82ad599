//! Prometheus metrics for the control plane core: one process-wide
//! `Registry` behind a `LazyLock`, with each metric forced into existence
//! at startup so `/metrics` always shows the full set.

use std::sync::LazyLock;

use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static GROUPS_TOTAL: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("autoscale_groups_total", "Total scaling groups across all tenants")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static POLICIES_TOTAL: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("autoscale_policies_total", "Total scaling policies across all groups")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static WEBHOOKS_TOTAL: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("autoscale_webhooks_total", "Total webhooks across all policies")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static CONVERGENCE_CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "autoscale_convergence_cycles_total",
        "Total convergence attempts dispatched",
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static CONVERGENCE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "autoscale_convergence_errors_total",
        "Total convergence attempts that resulted in group ERROR",
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static CONVERGENCE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "autoscale_convergence_duration_seconds",
        "Duration of each convergence attempt in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static POLICY_EXECUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("autoscale_policy_executions_total", "Policy firings by outcome"),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SCHEDULE_EVENTS_FETCHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "autoscale_schedule_events_fetched_total",
            "Scheduled events drained per bucket",
        ),
        &["bucket"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/// Forces every metric into existence so `/metrics` is complete from the
/// first scrape.
pub fn force_init() {
    LazyLock::force(&GROUPS_TOTAL);
    LazyLock::force(&POLICIES_TOTAL);
    LazyLock::force(&WEBHOOKS_TOTAL);
    LazyLock::force(&CONVERGENCE_CYCLES_TOTAL);
    LazyLock::force(&CONVERGENCE_ERRORS_TOTAL);
    LazyLock::force(&CONVERGENCE_DURATION);
    LazyLock::force(&POLICY_EXECUTIONS);
    LazyLock::force(&SCHEDULE_EVENTS_FETCHED);
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8"))
}
