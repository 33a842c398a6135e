use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Commit, Store, StoreError};
use crate::Points;
use crate::model::{AccountId, BalanceSnapshot, Millis, TransactionKind, TransactionRecord, TxId};

#[derive(Debug)]
struct Tables {
    balances: HashMap<AccountId, BalanceSnapshot>,
    history: Vec<TransactionRecord>,
    next_id: TxId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            balances: HashMap::new(),
            history: Vec::new(),
            next_id: 1,
        }
    }
}

impl Tables {
    fn append(
        &mut self,
        account: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Millis,
    ) -> TxId {
        let id = self.next_id;
        self.next_id += 1;
        self.history.push(TransactionRecord {
            id,
            account,
            amount,
            kind,
            timestamp,
        });
        id
    }
}

/// In-process store.
///
/// Balances and history live behind one mutex, so a commit is never
/// observable half-applied. The mutex is never held across an await.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// Simulated I/O delay applied before every call.
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call suspend for `latency` before touching state.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Overwrite an account balance without writing history.
    ///
    /// Bypasses every policy check; meant for fixtures and for reproducing
    /// corrupted data.
    pub fn seed_balance(
        &self,
        account: AccountId,
        balance: Points,
        updated_at: Millis,
    ) -> Result<(), StoreError> {
        self.tables()?.balances.insert(
            account,
            BalanceSnapshot {
                account,
                balance,
                updated_at,
            },
        );
        Ok(())
    }

    /// Append a history record without touching the balance.
    pub fn seed_record(
        &self,
        account: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Millis,
    ) -> Result<TxId, StoreError> {
        Ok(self.tables()?.append(account, amount, kind, timestamp))
    }

    /// Accounts that have a stored balance, in ascending order.
    pub fn accounts(&self) -> Result<Vec<AccountId>, StoreError> {
        let mut accounts: Vec<_> = self.tables()?.balances.keys().copied().collect();
        accounts.sort_unstable();
        Ok(accounts)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read_balance(&self, account: AccountId) -> Result<BalanceSnapshot, StoreError> {
        self.pause().await;
        let tables = self.tables()?;
        Ok(tables
            .balances
            .get(&account)
            .copied()
            .unwrap_or_else(|| BalanceSnapshot::empty(account)))
    }

    async fn read_history(
        &self,
        account: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        self.pause().await;
        let tables = self.tables()?;
        Ok(tables
            .history
            .iter()
            .filter(|record| record.account == account)
            .cloned()
            .collect())
    }

    async fn commit(&self, commit: Commit) -> Result<BalanceSnapshot, StoreError> {
        self.pause().await;
        let mut tables = self.tables()?;
        let snapshot = BalanceSnapshot {
            account: commit.account,
            balance: commit.new_balance,
            updated_at: commit.timestamp,
        };
        tables.balances.insert(commit.account, snapshot);
        tables.append(commit.account, commit.amount, commit.kind, commit.timestamp);
        Ok(snapshot)
    }
}
