//! Runtime configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::store::in_memory::DEFAULT_LOCK_WAIT;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS: &str = "STOCKFLOW_DB_MAX_CONNECTIONS";
pub const LOCK_WAIT_MS: &str = "STOCKFLOW_LOCK_WAIT_MS";
pub const RETRY_ATTEMPTS: &str = "STOCKFLOW_RETRY_ATTEMPTS";
pub const RETRY_BACKOFF_MS: &str = "STOCKFLOW_RETRY_BACKOFF_MS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by the storage backends and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Postgres connection string. `None` selects the in-memory backend.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Upper bound on waiting for any single row lock.
    pub lock_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            lock_wait: DEFAULT_LOCK_WAIT,
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup(DATABASE_URL).filter(|url| !url.trim().is_empty());
        let max_connections = parse_positive(&lookup, MAX_CONNECTIONS)?.unwrap_or(defaults.max_connections);
        let lock_wait = parse_positive::<u64>(&lookup, LOCK_WAIT_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_wait);
        let max_attempts = parse_positive(&lookup, RETRY_ATTEMPTS)?.unwrap_or(defaults.retry.max_attempts);
        let initial_backoff = parse_positive::<u64>(&lookup, RETRY_BACKOFF_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.initial_backoff);

        Ok(Self {
            database_url,
            max_connections,
            lock_wait,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff,
                ..defaults.retry
            },
        })
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(value))
}
