//! Process-wide configuration, loaded once at startup and immutable
//! thereafter. No module reads the environment directly
//! after `Config::from_env` returns.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub url: String,
    pub admin_url: String,
}

#[derive(Debug, Clone)]
pub struct ConvergerConfig {
    pub interval: Duration,
    pub build_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub pagination: usize,
    pub max_groups: usize,
    pub max_policies_per_group: usize,
    pub max_webhooks_per_policy: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Number of independent schedule-store buckets.
    pub buckets: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub url_root: String,
    pub bind_addr: SocketAddr,
    pub identity: IdentityConfig,
    /// Generalizes `cassandra.seed_hosts` — this core has no concrete
    /// store backend, but the address list is still part of the contract
    /// a real deployment wires up.
    pub store_seed_hosts: Vec<String>,
    /// Generalizes `zookeeper.hosts` for the distributed lock service.
    pub lock_hosts: Vec<String>,
    pub converger: ConvergerConfig,
    pub selfheal_interval: Duration,
    pub limits: LimitsConfig,
    pub schedule: ScheduleConfig,
}

fn env_var(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn split_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Assembles configuration from the environment. A missing *required*
    /// variable (`url_root`) is a startup error — exit code 1 at the CLI
    /// boundary.
    pub fn from_env() -> Result<Self> {
        let url_root = env_var("AUTOSCALE_URL_ROOT")?;

        let bind_addr: SocketAddr = env_var_or("AUTOSCALE_BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("AUTOSCALE_BIND_ADDR is not a valid socket address")?;

        let identity = IdentityConfig {
            url: env_var_or("AUTOSCALE_IDENTITY_URL", "https://identity.example.com/v2.0"),
            admin_url: env_var_or(
                "AUTOSCALE_IDENTITY_ADMIN_URL",
                "https://identity.example.com/v2.0/admin",
            ),
        };

        let store_seed_hosts = split_hosts(&env_var_or("AUTOSCALE_STORE_SEED_HOSTS", "127.0.0.1"));
        let lock_hosts = split_hosts(&env_var_or("AUTOSCALE_LOCK_HOSTS", "127.0.0.1"));

        let converger = ConvergerConfig {
            interval: Duration::from_secs(env_parse_or("AUTOSCALE_CONVERGER_INTERVAL_SECS", 10)?),
            build_timeout: Duration::from_secs(env_parse_or(
                "AUTOSCALE_CONVERGER_BUILD_TIMEOUT_SECS",
                30,
            )?),
        };

        let selfheal_interval =
            Duration::from_secs(env_parse_or("AUTOSCALE_SELFHEAL_INTERVAL_SECS", 60)?);

        let limits = LimitsConfig {
            pagination: env_parse_or("AUTOSCALE_LIMITS_PAGINATION", 100)?,
            max_groups: env_parse_or("AUTOSCALE_LIMITS_MAX_GROUPS", 1000)?,
            max_policies_per_group: env_parse_or("AUTOSCALE_LIMITS_MAX_POLICIES_PER_GROUP", 100)?,
            max_webhooks_per_policy: env_parse_or(
                "AUTOSCALE_LIMITS_MAX_WEBHOOKS_PER_POLICY",
                25,
            )?,
        };

        let schedule = ScheduleConfig {
            buckets: env_parse_or("AUTOSCALE_SCHEDULE_BUCKETS", 10)?,
        };

        Ok(Config {
            url_root,
            bind_addr,
            identity,
            store_seed_hosts,
            lock_hosts,
            converger,
            selfheal_interval,
            limits,
            schedule,
        })
    }

    /// Configuration fixture for tests: avoids touching the environment.
    pub fn for_tests() -> Self {
        Config {
            url_root: "https://autoscale.example.com".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            identity: IdentityConfig {
                url: "https://identity.example.com/v2.0".to_string(),
                admin_url: "https://identity.example.com/v2.0/admin".to_string(),
            },
            store_seed_hosts: vec!["127.0.0.1".to_string()],
            lock_hosts: vec!["127.0.0.1".to_string()],
            converger: ConvergerConfig {
                interval: Duration::from_secs(10),
                build_timeout: Duration::from_secs(30),
            },
            selfheal_interval: Duration::from_secs(60),
            limits: LimitsConfig {
                pagination: 100,
                max_groups: 1000,
                max_policies_per_group: 100,
                max_webhooks_per_policy: 25,
            },
            schedule: ScheduleConfig { buckets: 10 },
        }
    }

    /// Builds the capability URL prefix for a webhook.
    pub fn capability_url(&self, version: u32, hash: &str) -> String {
        format!("{}/v1.0/execute/{}/{}/", self.url_root, version, hash)
    }
}
