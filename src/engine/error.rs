//! Error types for ledger operations.

use std::time::Duration;

use thiserror::Error;

use crate::model::AccountId;
use crate::policy::Violation;
use crate::store::StoreError;

/// Who is at fault for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input; resubmitting different input may succeed.
    Validation,
    /// Well-formed input rejected by a business rule.
    Policy,
    /// Server-side failure, not caused by the caller.
    System,
}

/// Top-level error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gave up on account {account} after waiting {waited:?} for its lock")]
    LockTimeout { account: AccountId, waited: Duration },

    #[error("account id {0} is not a positive integer")]
    InvalidAccountId(AccountId),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Violation(violation) => violation.class(),
            LedgerError::InvalidAccountId(_) => ErrorClass::Validation,
            LedgerError::Store(_) | LedgerError::LockTimeout { .. } => ErrorClass::System,
        }
    }

    /// Validation and policy faults are the caller's to fix.
    pub fn is_client_error(&self) -> bool {
        matches!(self.class(), ErrorClass::Validation | ErrorClass::Policy)
    }
}
