//! Persistence boundary of the ledger.
//!
//! The ledger treats a [`Store`] as the single source of truth for balances
//! and history. `commit` is the atomicity boundary: a balance update and its
//! history record become visible together or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::Points;
use crate::model::{AccountId, BalanceSnapshot, Millis, TransactionKind, TransactionRecord};

mod memory;
pub use memory::MemoryStore;

/// Backing store failure. Always a system fault from the caller's view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store state poisoned by a panicked writer")]
    Poisoned,

    #[error("store returned corrupted data: {0}")]
    Corrupted(String),
}

/// A balance update paired with the history record that explains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub account: AccountId,
    pub new_balance: Points,
    pub amount: Points,
    pub kind: TransactionKind,
    pub timestamp: Millis,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Current balance. Unknown accounts read as an empty balance.
    async fn read_balance(&self, account: AccountId) -> Result<BalanceSnapshot, StoreError>;

    /// Every history record of the account, in no particular order.
    async fn read_history(&self, account: AccountId)
    -> Result<Vec<TransactionRecord>, StoreError>;

    /// Atomically set the balance and append one history record.
    async fn commit(&self, commit: Commit) -> Result<BalanceSnapshot, StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn read_balance(&self, account: AccountId) -> Result<BalanceSnapshot, StoreError> {
        (**self).read_balance(account).await
    }

    async fn read_history(
        &self,
        account: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).read_history(account).await
    }

    async fn commit(&self, commit: Commit) -> Result<BalanceSnapshot, StoreError> {
        (**self).commit(commit).await
    }
}
