//! Ledger configuration.
//!
//! Loaded from environment variables; anything unset keeps its default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::Points;
use crate::policy::PolicyConfig;

pub const MAX_BALANCE: &str = "POINT_MAX_BALANCE";
pub const DAILY_USE_LIMIT: &str = "POINT_DAILY_USE_LIMIT";
pub const MIN_USE_AMOUNT: &str = "POINT_MIN_USE_AMOUNT";
pub const USE_UNIT: &str = "POINT_USE_UNIT";
pub const DAILY_WINDOW_SECS: &str = "POINT_DAILY_WINDOW_SECS";
pub const LOCK_TIMEOUT_MS: &str = "POINT_LOCK_TIMEOUT_MS";

/// Everything a [`Ledger`](crate::Ledger) is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    pub policy: PolicyConfig,
    /// How long a mutation may wait for its account lock. `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

impl LedgerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = PolicyConfig::default();

        let policy = PolicyConfig {
            max_balance: Points::new(parse_or(&lookup, MAX_BALANCE, defaults.max_balance.get())?),
            daily_use_limit: Points::new(parse_or(
                &lookup,
                DAILY_USE_LIMIT,
                defaults.daily_use_limit.get(),
            )?),
            min_use_amount: Points::new(parse_or(
                &lookup,
                MIN_USE_AMOUNT,
                defaults.min_use_amount.get(),
            )?),
            use_unit: Points::new(parse_or(&lookup, USE_UNIT, defaults.use_unit.get())?),
            daily_window: Duration::from_secs(parse_or(
                &lookup,
                DAILY_WINDOW_SECS,
                defaults.daily_window.as_secs(),
            )?),
            ..defaults
        };

        let lock_timeout = parse_optional::<u64>(&lookup, LOCK_TIMEOUT_MS)?.map(Duration::from_millis);

        let config = Self {
            policy,
            lock_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every operation fail or misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        if policy.max_balance <= Points::ZERO {
            return Err(ConfigError::Inconsistent("max balance must be positive".into()));
        }
        if policy.daily_use_limit <= Points::ZERO {
            return Err(ConfigError::Inconsistent(
                "daily use limit must be positive".into(),
            ));
        }
        if policy.use_unit <= Points::ZERO {
            return Err(ConfigError::Inconsistent("use unit must be positive".into()));
        }
        if policy.min_charge_amount <= Points::ZERO {
            return Err(ConfigError::Inconsistent(
                "minimum charge must be positive".into(),
            ));
        }
        if policy.min_use_amount <= Points::ZERO || policy.min_use_amount > policy.max_balance {
            return Err(ConfigError::Inconsistent(format!(
                "minimum use {} must lie in 1..={}",
                policy.min_use_amount, policy.max_balance
            )));
        }
        if policy.daily_window.is_zero() {
            return Err(ConfigError::Inconsistent("daily window must not be empty".into()));
        }
        if self.lock_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Inconsistent("lock timeout must not be zero".into()));
        }
        Ok(())
    }
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|raw| raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)))
        .transpose()
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}
