//! Configuration loading and representation.
//!
//! All knobs come from the environment (`CENSUDX_*` plus the conventional
//! `DATABASE_URL` / `REDIS_URL` / `USE_PERSISTENT_STORES`). Unset variables
//! fall back to [`InventoryConfig::default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use censudx_inventory::{DEFAULT_LOW_STOCK_THRESHOLD, ThresholdPolicy};

use crate::coordinator::CoordinatorSettings;
use crate::ledger::CommitPolicy;
use crate::outbox::{DEFAULT_OUTBOX_CAPACITY, OutboxConfig, RetryPolicy};
use crate::sweeper::SweeperConfig;

/// Cap on retry backoff for outbox re-sends.
const MAX_PUBLISH_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub default_low_stock_threshold: i64,
    /// Default reservation TTL; `None` means reservations never expire.
    pub reservation_ttl_secs: Option<u64>,
    pub commit_policy: CommitPolicy,
    pub outbox_capacity: usize,
    /// Sends allowed for an event the broker refuses. Broker outages do not
    /// count against it.
    pub publish_max_attempts: u32,
    pub publish_base_delay_ms: u64,
    pub sweep_interval_ms: u64,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub use_persistent_stores: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            default_low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            reservation_ttl_secs: None,
            commit_policy: CommitPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            publish_max_attempts: 5,
            publish_base_delay_ms: 500,
            sweep_interval_ms: 1000,
            database_url: None,
            redis_url: None,
            use_persistent_stores: false,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            default_low_stock_threshold: parse_or(
                "CENSUDX_DEFAULT_LOW_STOCK_THRESHOLD",
                get("CENSUDX_DEFAULT_LOW_STOCK_THRESHOLD"),
                defaults.default_low_stock_threshold,
            )?,
            reservation_ttl_secs: get("CENSUDX_RESERVATION_TTL_SECS")
                .map(|v| parse("CENSUDX_RESERVATION_TTL_SECS", v))
                .transpose()?,
            commit_policy: match get("CENSUDX_COMMIT_POLICY") {
                Some(value) => value.parse().map_err(|reason| ConfigError::InvalidValue {
                    var: "CENSUDX_COMMIT_POLICY",
                    value,
                    reason,
                })?,
                None => defaults.commit_policy,
            },
            outbox_capacity: parse_or("CENSUDX_OUTBOX_CAPACITY", get("CENSUDX_OUTBOX_CAPACITY"), defaults.outbox_capacity)?,
            publish_max_attempts: parse_or(
                "CENSUDX_PUBLISH_MAX_ATTEMPTS",
                get("CENSUDX_PUBLISH_MAX_ATTEMPTS"),
                defaults.publish_max_attempts,
            )?,
            publish_base_delay_ms: parse_or(
                "CENSUDX_PUBLISH_BASE_DELAY_MS",
                get("CENSUDX_PUBLISH_BASE_DELAY_MS"),
                defaults.publish_base_delay_ms,
            )?,
            sweep_interval_ms: parse_or(
                "CENSUDX_SWEEP_INTERVAL_MS",
                get("CENSUDX_SWEEP_INTERVAL_MS"),
                defaults.sweep_interval_ms,
            )?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            use_persistent_stores: match get("USE_PERSISTENT_STORES") {
                Some(value) => parse_bool("USE_PERSISTENT_STORES", value)?,
                None => defaults.use_persistent_stores,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_low_stock_threshold < 0 {
            return Err(ConfigError::Invalid("low-stock threshold cannot be negative".into()));
        }
        if self.reservation_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid("reservation TTL must be positive when set".into()));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("outbox capacity must be at least 1".into()));
        }
        if self.publish_max_attempts == 0 {
            return Err(ConfigError::Invalid("publish attempts must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep interval must be positive".into()));
        }
        if self.use_persistent_stores && self.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        Ok(())
    }

    pub fn reservation_ttl(&self) -> Option<chrono::Duration> {
        self.reservation_ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.publish_base_delay_ms);
        RetryPolicy::exponential(
            self.publish_max_attempts,
            base_delay,
            MAX_PUBLISH_DELAY.max(base_delay),
        )
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            capacity: self.outbox_capacity,
            retry: self.retry_policy(),
        }
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.default_low_stock_threshold)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            thresholds: self.threshold_policy(),
            commit_policy: self.commit_policy,
            default_reservation_ttl: self.reservation_ttl(),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_millis(self.sweep_interval_ms),
            ..SweeperConfig::default()
        }
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.map(|v| parse(var, v)).transpose().map(|v| v.unwrap_or(default))
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value,
            reason: "expected true or false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<InventoryConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        InventoryConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, InventoryConfig::default());
        assert_eq!(config.default_low_stock_threshold, 10);
        assert_eq!(config.commit_policy, CommitPolicy::Consume);
        assert_eq!(config.reservation_ttl(), None);
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("CENSUDX_DEFAULT_LOW_STOCK_THRESHOLD", "25"),
            ("CENSUDX_RESERVATION_TTL_SECS", "900"),
            ("CENSUDX_COMMIT_POLICY", "mark_only"),
            ("CENSUDX_OUTBOX_CAPACITY", "64"),
            ("CENSUDX_PUBLISH_MAX_ATTEMPTS", "3"),
            ("CENSUDX_PUBLISH_BASE_DELAY_MS", "100"),
            ("CENSUDX_SWEEP_INTERVAL_MS", "250"),
            ("DATABASE_URL", "postgres://localhost/inventory"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("USE_PERSISTENT_STORES", "true"),
        ])
        .unwrap();

        assert_eq!(config.default_low_stock_threshold, 25);
        assert_eq!(config.reservation_ttl(), Some(chrono::Duration::seconds(900)));
        assert_eq!(config.commit_policy, CommitPolicy::MarkOnly);
        assert_eq!(config.outbox_config().capacity, 64);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(100));
        assert_eq!(config.sweeper_config().interval, Duration::from_millis(250));
        assert!(config.use_persistent_stores);
        assert_eq!(config.coordinator_settings().thresholds.default_threshold(), 25);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = load(&[("CENSUDX_OUTBOX_CAPACITY", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "CENSUDX_OUTBOX_CAPACITY", .. }));

        let err = load(&[("CENSUDX_COMMIT_POLICY", "ship_it")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "CENSUDX_COMMIT_POLICY", .. }));

        let err = load(&[("USE_PERSISTENT_STORES", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "USE_PERSISTENT_STORES", .. }));
    }

    #[test]
    fn validate_rejects_zero_capacity_and_interval() {
        assert!(matches!(load(&[("CENSUDX_OUTBOX_CAPACITY", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(load(&[("CENSUDX_SWEEP_INTERVAL_MS", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(load(&[("CENSUDX_RESERVATION_TTL_SECS", "0")]), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn persistent_stores_require_database_url() {
        let err = load(&[("USE_PERSISTENT_STORES", "1")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }
}
