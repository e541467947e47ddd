//! Scheduler configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, DispatchError, ResourceType, SchedulerLimits};

/// Prefix for environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "REPLICA_DISPATCH_";

const DEFAULT_IDENTITY: &str = "replica_dispatch";
const DEFAULT_MAX_CAPACITY: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_LEASE_TTL_SECS: u64 = 3600;
const DEFAULT_LEASE_RENEW_INTERVAL_MS: u64 = 60_000;
const DEFAULT_RUN_BUDGET_SECS: u64 = 3600;

/// Lease store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseBackendConfig {
    /// Process-local leases.
    InMemory,
    /// JSON lease files shared by processes on one host.
    File {
        /// Directory holding the lease files.
        dir: PathBuf,
    },
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lease key; one active run per identity.
    pub identity: String,
    /// Maximum jobs in flight.
    pub max_capacity: usize,
    /// Size of each backlog query.
    pub db_retrieve_batch_size: usize,
    /// Lease time-to-live in seconds.
    pub lease_ttl_secs: u64,
    /// Lease renewal interval in milliseconds; 0 renews every iteration.
    pub lease_renew_interval_ms: u64,
    /// Run time budget in seconds.
    pub run_budget_secs: u64,
    /// Free slots a draining run waits for before re-querying.
    /// Defaults to half the capacity, rounded up.
    pub drain_refill_watermark: Option<usize>,
    /// Lease backend.
    pub lease_backend: LeaseBackendConfig,
    /// Resource types this scheduler dispatches.
    pub resource_types: Vec<ResourceType>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            max_capacity: DEFAULT_MAX_CAPACITY,
            db_retrieve_batch_size: DEFAULT_BATCH_SIZE,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            lease_renew_interval_ms: DEFAULT_LEASE_RENEW_INTERVAL_MS,
            run_budget_secs: DEFAULT_RUN_BUDGET_SECS,
            drain_refill_watermark: None,
            lease_backend: LeaseBackendConfig::InMemory,
            resource_types: ResourceType::ALL.to_vec(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfig(msg.into())
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.identity.trim().is_empty() {
            return Err(invalid("identity must not be empty"));
        }
        if self.max_capacity == 0 {
            return Err(invalid("max_capacity must be greater than 0"));
        }
        if self.db_retrieve_batch_size == 0 {
            return Err(invalid("db_retrieve_batch_size must be greater than 0"));
        }
        if self.lease_ttl_secs == 0 {
            return Err(invalid("lease_ttl_secs must be greater than 0"));
        }
        if self.run_budget_secs == 0 {
            return Err(invalid("run_budget_secs must be greater than 0"));
        }
        if self.lease_renew_interval() >= self.lease_ttl() {
            return Err(invalid("lease_renew_interval_ms must be shorter than lease_ttl_secs"));
        }
        if self.resource_types.is_empty() {
            return Err(invalid("at least one resource type must be enabled"));
        }
        if let Some(watermark) = self.drain_refill_watermark {
            if watermark == 0 || watermark > self.max_capacity {
                return Err(invalid(format!(
                    "drain_refill_watermark must be between 1 and max_capacity ({}), \
                     got {watermark}",
                    self.max_capacity
                )));
            }
        }
        Ok(())
    }

    /// Lease TTL as a duration.
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Lease renewal interval as a duration.
    pub const fn lease_renew_interval(&self) -> Duration {
        Duration::from_millis(self.lease_renew_interval_ms)
    }

    /// Scheduler limits derived from this configuration.
    pub fn limits(&self) -> SchedulerLimits {
        let limits = SchedulerLimits::new(self.max_capacity, self.db_retrieve_batch_size)
            .with_lease(self.lease_ttl(), self.lease_renew_interval())
            .with_run_budget(Duration::from_secs(self.run_budget_secs));
        match self.drain_refill_watermark {
            Some(watermark) => limits.with_drain_refill_watermark(watermark),
            None => limits,
        }
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, DispatchError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| invalid(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scheduler config {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("loading scheduler config {}", path.display()))
    }

    /// Load configuration from `REPLICA_DISPATCH_*` environment variables,
    /// reading a `.env` file first when present. Unset variables keep their
    /// defaults.
    pub fn from_env() -> AppResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load configuration with a custom variable lookup. Keys are passed
    /// with the [`ENV_PREFIX`] already applied.
    pub fn from_env_with<F>(get_env: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| get_env(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(identity) = var("IDENTITY") {
            cfg.identity = identity;
        }
        parse_into(&var, "MAX_CAPACITY", &mut cfg.max_capacity)?;
        parse_into(&var, "DB_RETRIEVE_BATCH_SIZE", &mut cfg.db_retrieve_batch_size)?;
        parse_into(&var, "LEASE_TTL_SECS", &mut cfg.lease_ttl_secs)?;
        parse_into(&var, "LEASE_RENEW_INTERVAL_MS", &mut cfg.lease_renew_interval_ms)?;
        parse_into(&var, "RUN_BUDGET_SECS", &mut cfg.run_budget_secs)?;
        if let Some(raw) = var("DRAIN_REFILL_WATERMARK") {
            cfg.drain_refill_watermark = Some(
                raw.trim().parse().with_context(|| {
                    format!("{ENV_PREFIX}DRAIN_REFILL_WATERMARK must be an integer, got '{raw}'")
                })?,
            );
        }
        if let Some(dir) = var("LEASE_DIR") {
            cfg.lease_backend = LeaseBackendConfig::File { dir: dir.into() };
        }
        if let Some(raw) = var("RESOURCE_TYPES") {
            cfg.resource_types = parse_resource_types(&raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_into<T, V>(var: &V, name: &str, slot: &mut T) -> AppResult<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(name) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{ENV_PREFIX}{name} must be an integer, got '{raw}'"))?;
    }
    Ok(())
}

fn parse_resource_types(raw: &str) -> AppResult<Vec<ResourceType>> {
    let mut types = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| invalid(format!("unknown resource type '{name}'")))?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}
