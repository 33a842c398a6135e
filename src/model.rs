//! Core domain types for the point ledger.

use std::fmt;

use thiserror::Error;

use crate::Points;

/// Account identifier. Always positive.
pub type AccountId = u64;

/// History record identifier, unique across all accounts.
pub type TxId = u64;

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Largest account id accepted from external input (2^53 - 1).
pub const MAX_ACCOUNT_ID: AccountId = 9_007_199_254_740_991;

/// Direction of a history record. The amount itself is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Credit.
    Charge,
    /// Debit.
    Use,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Charge => f.write_str("charge"),
            TransactionKind::Use => f.write_str("use"),
        }
    }
}

/// An immutable entry of an account's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TxId,
    pub account: AccountId,
    pub amount: Points,
    pub kind: TransactionKind,
    pub timestamp: Millis,
}

/// Committed balance of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub account: AccountId,
    pub balance: Points,
    /// Time of the last mutation, 0 for an account that was never written.
    pub updated_at: Millis,
}

impl BalanceSnapshot {
    /// Snapshot of an account nobody has touched yet.
    pub fn empty(account: AccountId) -> Self {
        Self {
            account,
            balance: Points::ZERO,
            updated_at: 0,
        }
    }
}

/// A mutating request submitted to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add points to an account.
    Charge { account: AccountId, amount: Points },
    /// Spend points from an account.
    Use { account: AccountId, amount: Points },
}

impl Operation {
    pub fn account(&self) -> AccountId {
        match self {
            Operation::Charge { account, .. } | Operation::Use { account, .. } => *account,
        }
    }

    pub fn amount(&self) -> Points {
        match self {
            Operation::Charge { amount, .. } | Operation::Use { amount, .. } => *amount,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Operation::Charge { .. } => TransactionKind::Charge,
            Operation::Use { .. } => TransactionKind::Use,
        }
    }
}

/// Rejection reasons for [`parse_account_id`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountIdError {
    #[error("account id '{0}' is not a positive integer")]
    NotPositiveInteger(String),

    #[error("account id '{0}' exceeds {MAX_ACCOUNT_ID}")]
    TooLarge(String),
}

/// Parse an externally supplied account id.
///
/// Accepts surrounding whitespace and an optional leading `+`. Rejects zero,
/// leading zeros, any other sign and anything above [`MAX_ACCOUNT_ID`].
pub fn parse_account_id(raw: &str) -> Result<AccountId, AccountIdError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let well_formed = digits
        .bytes()
        .next()
        .is_some_and(|first| (b'1'..=b'9').contains(&first))
        && digits.bytes().all(|b| b.is_ascii_digit());
    if !well_formed {
        return Err(AccountIdError::NotPositiveInteger(trimmed.to_string()));
    }

    // all-digit input only fails to parse on overflow
    match digits.parse::<u64>() {
        Ok(id) if id <= MAX_ACCOUNT_ID => Ok(id),
        _ => Err(AccountIdError::TooLarge(trimmed.to_string())),
    }
}
