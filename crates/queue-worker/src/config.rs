use std::time::Duration;

use queue_core::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRICE_THRESHOLD, EnergyPolicy, QueueError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    /// Single-process fallback; jobs do not survive a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    pub worker_id: String,         // prefix; loops append -<n>
    pub concurrency: usize,        // independent worker loops
    pub poll_interval_ms: u64,     // e.g. 5000
    pub error_backoff_ms: u64,     // e.g. 10000
    pub sweep_interval_ms: u64,    // e.g. 60000
    pub stale_timeout_ms: u64,     // e.g. 300000

    pub price_threshold: f64,
    pub fail_open: bool,
    pub energy_status_url: Option<String>,
    pub energy_status_timeout_ms: u64,

    pub processor_url: Option<String>,
    pub max_attempts: i32,
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let backend = match get("QUEUE_BACKEND").as_deref().map(str::trim) {
            Some("memory") | Some("in-memory") => Backend::Memory,
            _ => Backend::Postgres,
        };
        let worker_id = non_empty(get("WORKER_ID"))
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());

        Self {
            backend,
            database_url: non_empty(get("DATABASE_URL")),
            db_max_connections: parse_or(get("DB_MAX_CONNECTIONS"), 10),
            worker_id,
            concurrency: parse_or(get("WORKER_CONCURRENCY"), 1),
            poll_interval_ms: parse_or(get("QUEUE_POLL_INTERVAL_MS"), 5_000),
            error_backoff_ms: parse_or(get("QUEUE_ERROR_BACKOFF_MS"), 10_000),
            sweep_interval_ms: parse_or(get("STALE_RECOVERY_INTERVAL_MS"), 60_000),
            stale_timeout_ms: parse_or(get("STALE_TIMEOUT_MS"), 300_000),
            price_threshold: parse_or(get("ENERGY_PRICE_THRESHOLD_EUR"), DEFAULT_PRICE_THRESHOLD),
            fail_open: flag(get("ENERGY_FAIL_OPEN"), true),
            energy_status_url: non_empty(get("ENERGY_STATUS_URL")),
            energy_status_timeout_ms: parse_or(get("ENERGY_STATUS_TIMEOUT_MS"), 1_000),
            processor_url: non_empty(get("PROCESSOR_URL")),
            max_attempts: parse_or(get("JOB_MAX_ATTEMPTS"), DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.backend == Backend::Postgres && self.database_url.is_none() {
            return Err(QueueError::Configuration(
                "DATABASE_URL must be set (postgres://...)".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(QueueError::Configuration(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        for (name, ms) in [
            ("QUEUE_POLL_INTERVAL_MS", self.poll_interval_ms),
            ("QUEUE_ERROR_BACKOFF_MS", self.error_backoff_ms),
            ("STALE_RECOVERY_INTERVAL_MS", self.sweep_interval_ms),
            ("STALE_TIMEOUT_MS", self.stale_timeout_ms),
        ] {
            if ms == 0 {
                return Err(QueueError::Configuration(format!("{name} must be greater than 0")));
            }
        }
        if self.max_attempts < 1 {
            return Err(QueueError::Configuration(format!(
                "JOB_MAX_ATTEMPTS must be at least 1, got {}",
                self.max_attempts
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> EnergyPolicy {
        EnergyPolicy::new(self.price_threshold, self.fail_open)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn energy_status_timeout(&self) -> Duration {
        Duration::from_millis(self.energy_status_timeout_ms)
    }
}
