//! Numeric rules every balance and amount must satisfy.
//!
//! The evaluator is pure: each check looks only at its arguments and the
//! configured limits, and reports the specific rule that was broken.

use std::time::Duration;

use thiserror::Error;

use crate::Points;
use crate::engine::ErrorClass;

/// Policy limits. Defaults are the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Upper bound of any balance, and of any single charge or use.
    pub max_balance: Points,
    /// Maximum total of `Use` amounts inside one trailing window.
    pub daily_use_limit: Points,
    pub min_charge_amount: Points,
    pub min_use_amount: Points,
    /// Every use must be a multiple of this.
    pub use_unit: Points,
    /// Length of the trailing window the daily limit is evaluated over.
    pub daily_window: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_balance: Points::new(10_000_000),
            daily_use_limit: Points::new(50_000),
            min_charge_amount: Points::new(1),
            min_use_amount: Points::new(100),
            use_unit: Points::new(100),
            daily_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A broken policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("balance {balance} is outside the allowed range")]
    InvalidBalanceRange { balance: Points },

    #[error("invalid charge amount {amount}")]
    InvalidChargeAmount { amount: Points },

    #[error("charging {amount} onto {balance} exceeds the limit of {limit}")]
    ChargeLimitExceeded {
        balance: Points,
        amount: Points,
        limit: Points,
    },

    #[error("invalid use amount {amount}")]
    InvalidUseAmount { amount: Points },

    #[error("using {amount} after {used_today} today exceeds the daily limit of {limit}")]
    DailyUseLimitExceeded {
        used_today: Points,
        amount: Points,
        limit: Points,
    },

    #[error("insufficient balance: available {balance}, requested {amount}")]
    InsufficientBalance { balance: Points, amount: Points },
}

impl Violation {
    pub fn class(&self) -> ErrorClass {
        match self {
            // a persisted balance out of range means corrupted data, not a bad request
            Violation::InvalidBalanceRange { .. } => ErrorClass::System,
            Violation::InvalidChargeAmount { .. } | Violation::InvalidUseAmount { .. } => {
                ErrorClass::Validation
            }
            Violation::ChargeLimitExceeded { .. }
            | Violation::DailyUseLimitExceeded { .. }
            | Violation::InsufficientBalance { .. } => ErrorClass::Policy,
        }
    }
}

/// Stateless policy evaluator.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    config: PolicyConfig,
}

impl Policy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// `0 <= balance <= max_balance`
    pub fn check_balance_range(&self, balance: Points) -> Result<(), Violation> {
        if balance < Points::ZERO || balance > self.config.max_balance {
            return Err(Violation::InvalidBalanceRange { balance });
        }
        Ok(())
    }

    /// `min_charge_amount <= amount <= max_balance`
    pub fn check_charge_amount(&self, amount: Points) -> Result<(), Violation> {
        if amount < self.config.min_charge_amount || amount > self.config.max_balance {
            return Err(Violation::InvalidChargeAmount { amount });
        }
        Ok(())
    }

    /// `balance + amount <= max_balance`
    pub fn check_charge_limit(&self, balance: Points, amount: Points) -> Result<(), Violation> {
        let limit = self.config.max_balance;
        match balance.checked_add(amount) {
            Some(total) if total <= limit => Ok(()),
            _ => Err(Violation::ChargeLimitExceeded {
                balance,
                amount,
                limit,
            }),
        }
    }

    /// `min_use_amount <= amount <= max_balance` and a whole number of units.
    pub fn check_use_amount(&self, amount: Points) -> Result<(), Violation> {
        if amount < self.config.min_use_amount
            || amount > self.config.max_balance
            || !amount.is_multiple_of(self.config.use_unit)
        {
            return Err(Violation::InvalidUseAmount { amount });
        }
        Ok(())
    }

    /// `used_today + amount <= daily_use_limit`
    pub fn check_daily_use_limit(
        &self,
        used_today: Points,
        amount: Points,
    ) -> Result<(), Violation> {
        let limit = self.config.daily_use_limit;
        match used_today.checked_add(amount) {
            Some(total) if total <= limit => Ok(()),
            _ => Err(Violation::DailyUseLimitExceeded {
                used_today,
                amount,
                limit,
            }),
        }
    }

    /// `balance >= amount`
    pub fn check_sufficient_balance(
        &self,
        balance: Points,
        amount: Points,
    ) -> Result<(), Violation> {
        if balance < amount {
            return Err(Violation::InsufficientBalance { balance, amount });
        }
        Ok(())
    }
}
