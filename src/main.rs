mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use autoscale_core::admin::Admin;
use autoscale_core::clock::ClockHandle;
use autoscale_core::config::Config;
use autoscale_core::http::{self, AppState};
use autoscale_core::lock::InProcessGroupLock;
use autoscale_core::metrics;
use autoscale_core::policy::PolicyExecutor;
use autoscale_core::scheduler::Scheduler;
use autoscale_core::store::{
    CapabilityIndex, InMemoryGroupStore, MutationEngine, Quotas, ScheduleStore,
    StateTable,
};

use cli::{AdminAction, Cli, Commands};

/// Wires together the components a real deployment shares across `serve`,
/// `check` and `admin`: one group catalog, one mutation engine, one
/// schedule store.
struct Core {
    store: Arc<InMemoryGroupStore>,
    executor: Arc<PolicyExecutor<InMemoryGroupStore>>,
    admin: Arc<Admin<InMemoryGroupStore>>,
    schedule: Arc<ScheduleStore>,
}

fn build_core(config: &Config) -> Core {
    let clock = ClockHandle::system();
    let capability_index = Arc::new(CapabilityIndex::new());
    let states = Arc::new(StateTable::new());

    let store = Arc::new(InMemoryGroupStore::new(
        states.clone(),
        capability_index.clone(),
        Quotas {
            max_groups: config.limits.max_groups,
            max_policies_per_group: config.limits.max_policies_per_group,
            max_webhooks_per_policy: config.limits.max_webhooks_per_policy,
        },
        clock,
    ));

    let mutation = Arc::new(MutationEngine::new(
        Arc::new(InProcessGroupLock::new()),
        states,
        config.converger.build_timeout,
    ));

    let executor = Arc::new(PolicyExecutor::new(store.clone(), mutation, capability_index));
    let admin = Arc::new(Admin::new(store.clone()));
    let schedule = Arc::new(ScheduleStore::new(config.schedule.buckets));

    Core {
        store,
        executor,
        admin,
        schedule,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
    metrics::force_init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "startup configuration error");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Check => check(config).await,
        Commands::Admin {
            action: AdminAction::Counts { tenant },
        } => admin_counts(config, tenant).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "unrecoverable dependency failure");
            ExitCode::from(2)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let core = build_core(&config);
    let config = Arc::new(config);

    let state = AppState {
        store: core.store.clone(),
        executor: core.executor.clone(),
        admin: core.admin,
        config: config.clone(),
    };

    // A real deployment supplies its own `Converger` (load balancer /
    // compute API client) and spawns `ConvergenceDispatcher::run` here the
    // same way the scheduler is spawned below; this crate ships only the
    // trait and a panicking placeholder (`convergence::NoopConverger`), so
    // it is deliberately not started without one.
    warn!("convergence dispatcher not started: no Converger wired into this binary");

    let scheduler = Arc::new(Scheduler::new(core.schedule, core.executor));
    let _scheduler_handles = scheduler.spawn_all(Duration::from_secs(1));

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "http facade listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

async fn check(config: Config) -> anyhow::Result<()> {
    let core = build_core(&config);
    let (healthy, detail) = core.admin.health_check().await;
    if !healthy {
        anyhow::bail!("store health check failed: {detail}");
    }
    info!(url_root = %config.url_root, bind_addr = %config.bind_addr, "configuration ok");
    Ok(())
}

async fn admin_counts(config: Config, tenant: String) -> anyhow::Result<()> {
    let core = build_core(&config);
    let counts = core.admin.counts(&tenant).await;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
