//! Broker configuration.
//!
//! Values come from code (builder methods) or from `PROVER_BROKER_*`
//! environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use proving_broker_core::PriorityTable;

use crate::error::BrokerError;

pub const ENV_JOB_TIMEOUT_MS: &str = "PROVER_BROKER_JOB_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "PROVER_BROKER_POLL_INTERVAL_MS";
pub const ENV_JOB_MAX_RETRIES: &str = "PROVER_BROKER_JOB_MAX_RETRIES";
pub const ENV_EPOCHS_TO_KEEP: &str = "PROVER_BROKER_MAX_EPOCHS_TO_KEEP_RESULTS_FOR";
pub const ENV_LEASE_POLICY: &str = "PROVER_BROKER_LEASE_POLICY";
pub const ENV_DATA_DIRECTORY: &str = "PROVER_BROKER_DATA_DIRECTORY";

/// File name used inside the data directory.
pub const SQLITE_FILE_NAME: &str = "proving_broker.sqlite";

/// How heartbeats treat a lease that is not the current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeasePolicy {
    /// Only the current lease holder may keep a job; anyone else is handed a
    /// replacement.
    #[default]
    Strict,
    /// An agent presenting an older (or equal) lease takes the job back, and a
    /// heartbeat for a queued job adopts it. Lets agents that kept working
    /// through a broker restart hold on to their job.
    ReclaimOlder,
}

impl FromStr for LeasePolicy {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "strict" => Ok(LeasePolicy::Strict),
            "reclaim-older" => Ok(LeasePolicy::ReclaimOlder),
            other => Err(BrokerError::InvalidConfig(format!(
                "unknown lease policy '{other}' (expected 'strict' or 'reclaim-older')"
            ))),
        }
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// How long a lease lives without a heartbeat.
    pub job_timeout: Duration,
    /// Supervisor tick interval.
    pub poll_interval: Duration,
    /// Failed attempts a job may have before it is rejected. Only retryable
    /// errors short of this count requeue the job.
    pub max_retries: u32,
    /// Retention window: epochs behind the watermark still admitted and kept.
    pub epochs_to_keep: u64,
    pub lease_policy: LeasePolicy,
    /// Kind ranking used by the selector.
    #[serde(skip)]
    pub priority: PriorityTable,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_retries: 3,
            epochs_to_keep: 1,
            lease_policy: LeasePolicy::Strict,
            priority: PriorityTable::default(),
        }
    }
}

impl BrokerConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, BrokerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BrokerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_JOB_TIMEOUT_MS)? {
            config.job_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, ENV_JOB_MAX_RETRIES)? {
            config.max_retries = retries;
        }
        if let Some(epochs) = parse_var(&lookup, ENV_EPOCHS_TO_KEEP)? {
            config.epochs_to_keep = epochs;
        }
        if let Some(raw) = lookup(ENV_LEASE_POLICY) {
            config.lease_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.job_timeout.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "job_timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_epochs_to_keep(mut self, epochs: u64) -> Self {
        self.epochs_to_keep = epochs;
        self
    }

    pub fn with_lease_policy(mut self, policy: LeasePolicy) -> Self {
        self.lease_policy = policy;
        self
    }

    pub fn with_priority(mut self, priority: PriorityTable) -> Self {
        self.priority = priority;
        self
    }
}

/// Which persistence backend to run on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DatabaseConfig {
    /// Process-local; nothing survives the process.
    #[default]
    InMemory,
    /// Embedded SQLite file.
    Sqlite { path: PathBuf },
}

impl DatabaseConfig {
    pub fn sqlite_in(data_directory: impl Into<PathBuf>) -> Self {
        DatabaseConfig::Sqlite {
            path: data_directory.into().join(SQLITE_FILE_NAME),
        }
    }

    /// In-memory unless `PROVER_BROKER_DATA_DIRECTORY` is set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(ENV_DATA_DIRECTORY) {
            Some(dir) if !dir.trim().is_empty() => Self::sqlite_in(dir),
            _ => DatabaseConfig::InMemory,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, BrokerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| BrokerError::InvalidConfig(format!("{key}={raw}: {e}"))),
    }
}
