use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::LedgerError;
use crate::model::AccountId;

/// Registry of one mutex per account.
///
/// Locks are created on first use and kept for the life of the registry.
/// Creation goes through a single map entry, so two callers racing on a new
/// account always end up with the same lock.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    acquire_timeout: Option<Duration>,
}

impl AccountLocks {
    pub fn new(acquire_timeout: Option<Duration>) -> Self {
        Self {
            locks: DashMap::new(),
            acquire_timeout,
        }
    }

    /// The lock guarding `account`, created if missing.
    pub fn lock_for(&self, account: AccountId) -> Arc<Mutex<()>> {
        // the shard guard is released at the end of this statement, never held across an await
        self.locks
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Number of accounts that ever took a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Run `critical` while holding the lock of `account`.
    ///
    /// The guard is dropped on every exit path, including errors returned by
    /// `critical`. Dropping the returned future while it is still waiting
    /// leaves the lock untouched.
    pub async fn with_account_lock<F, Fut, T>(
        &self,
        account: AccountId,
        critical: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let lock = self.lock_for(account);

        let _guard = match self.acquire_timeout {
            Some(waited) => tokio::time::timeout(waited, lock.lock_owned())
                .await
                .map_err(|_| {
                    warn!(account, ?waited, "timed out waiting for account lock");
                    LedgerError::LockTimeout { account, waited }
                })?,
            None => lock.lock_owned().await,
        };

        critical().await
    }
}
