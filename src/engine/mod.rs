//! Point ledger engine.
//!
//! The engine validates charge and use requests against the policy and
//! applies them through a [`Store`]. Mutations on one account are serialized
//! by a per-account lock; different accounts never wait on each other.
//! Reads take no lock and observe the last committed state.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

use crate::Points;
use crate::config::LedgerConfig;
use crate::model::{
    AccountId, BalanceSnapshot, Millis, Operation, TransactionKind, TransactionRecord,
};
use crate::policy::Policy;
use crate::store::{Commit, Store, StoreError};

mod locks;
pub use locks::AccountLocks;

mod error;
pub use error::{ErrorClass, LedgerError};

/// Outcome counts of [`Ledger::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: usize,
    pub rejected: usize,
}

/// The ledger engine.
///
/// Owns its lock registry; share it between tasks behind an `Arc`.
pub struct Ledger<S> {
    store: S,
    policy: Policy,
    locks: AccountLocks,
}

/// Public API
impl<S: Store> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            policy: Policy::new(config.policy),
            locks: AccountLocks::new(config.lock_timeout),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Current balance of an account.
    ///
    /// A stored balance outside the policy range is reported as
    /// [`Violation::InvalidBalanceRange`](crate::policy::Violation), a system fault.
    pub async fn get_balance(&self, account: AccountId) -> Result<BalanceSnapshot, LedgerError> {
        ensure_account(account)?;
        let snapshot = self.store.read_balance(account).await.inspect_err(|e| {
            error!(account, reason = %e, "balance read failed");
        })?;
        self.check_stored_balance(account, snapshot.balance)?;
        Ok(snapshot)
    }

    /// Full history of an account, newest first. Ties on timestamp are broken
    /// by descending id.
    pub async fn get_history(
        &self,
        account: AccountId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        ensure_account(account)?;
        let mut history = self.store.read_history(account).await.inspect_err(|e| {
            error!(account, reason = %e, "history read failed");
        })?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(history)
    }

    /// Credit `amount` points to `account`.
    pub async fn charge(
        &self,
        account: AccountId,
        amount: Points,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let result = self.try_charge(account, amount).await;
        Self::log_result(TransactionKind::Charge, account, amount, &result);
        result
    }

    /// Debit `amount` points from `account`.
    pub async fn use_points(
        &self,
        account: AccountId,
        amount: Points,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let result = self.try_use(account, amount).await;
        Self::log_result(TransactionKind::Use, account, amount, &result);
        result
    }

    /// Apply a single operation.
    pub async fn apply(&self, operation: Operation) -> Result<BalanceSnapshot, LedgerError> {
        match operation {
            Operation::Charge { account, amount } => self.charge(account, amount).await,
            Operation::Use { account, amount } => self.use_points(account, amount).await,
        }
    }

    /// Apply every operation of the stream in order.
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) -> RunSummary {
        let mut summary = RunSummary::default();
        while let Some(operation) = stream.next().await {
            // a rejected operation must not stop the run; it is already logged
            match self.apply(operation).await {
                Ok(_) => summary.applied += 1,
                Err(_) => summary.rejected += 1,
            }
        }
        summary
    }
}

/// Private API
impl<S: Store> Ledger<S> {
    /// Small helper to log mutation results
    fn log_result(
        kind: TransactionKind,
        account: AccountId,
        amount: Points,
        result: &Result<BalanceSnapshot, LedgerError>,
    ) {
        match result {
            Ok(snapshot) => {
                info!(
                    account,
                    amount = %amount,
                    balance = %snapshot.balance,
                    "{kind} applied"
                );
            }
            Err(e) if e.is_client_error() => {
                info!(account, amount = %amount, reason = %e, "{kind} rejected");
            }
            Err(e) => {
                error!(account, amount = %amount, reason = %e, "{kind} failed");
            }
        }
    }

    fn check_stored_balance(&self, account: AccountId, balance: Points) -> Result<(), LedgerError> {
        self.policy.check_balance_range(balance).map_err(|violation| {
            error!(account, balance = %balance, "stored balance out of range");
            LedgerError::from(violation)
        })
    }

    /// Sum of `Use` amounts strictly newer than `now - daily_window`.
    ///
    /// A total that overflows can only come from corrupted history and is
    /// reported as a store fault.
    fn used_in_window(
        &self,
        account: AccountId,
        history: &[TransactionRecord],
        now: Millis,
    ) -> Result<Points, LedgerError> {
        let window = self.policy.config().daily_window.as_millis();
        let since = Millis::try_from(window).map_or(0, |window| now.saturating_sub(window));
        history
            .iter()
            .filter(|record| record.kind == TransactionKind::Use && record.timestamp > since)
            .try_fold(Points::ZERO, |total, record| total.checked_add(record.amount))
            .ok_or_else(|| {
                error!(account, "daily use total overflows");
                StoreError::Corrupted(format!("use total of account {account} overflows")).into()
            })
    }

    /// `charge`:
    /// - Validate the amount before taking the lock
    /// - Under the account lock, read the balance and check the limit
    /// - Commit the new balance together with a `Charge` record
    async fn try_charge(
        &self,
        account: AccountId,
        amount: Points,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_account(account)?;
        self.policy.check_charge_amount(amount)?;

        self.locks
            .with_account_lock(account, move || async move {
                let current = self.store.read_balance(account).await?;
                self.check_stored_balance(account, current.balance)?;
                self.policy.check_charge_limit(current.balance, amount)?;

                let snapshot = self
                    .store
                    .commit(Commit {
                        account,
                        new_balance: current.balance + amount,
                        amount,
                        kind: TransactionKind::Charge,
                        timestamp: now_millis(),
                    })
                    .await?;
                Ok::<_, LedgerError>(snapshot)
            })
            .await
    }

    /// `use`:
    /// - Validate the amount before taking the lock
    /// - Under the account lock, read balance and history
    /// - Check the daily limit, then the balance
    /// - Commit the new balance together with a `Use` record
    async fn try_use(
        &self,
        account: AccountId,
        amount: Points,
    ) -> Result<BalanceSnapshot, LedgerError> {
        ensure_account(account)?;
        self.policy.check_use_amount(amount)?;

        self.locks
            .with_account_lock(account, move || async move {
                let current = self.store.read_balance(account).await?;
                self.check_stored_balance(account, current.balance)?;
                let history = self.store.read_history(account).await?;

                let now = now_millis();
                let used_today = self.used_in_window(account, &history, now)?;
                self.policy.check_daily_use_limit(used_today, amount)?;
                self.policy.check_sufficient_balance(current.balance, amount)?;

                let snapshot = self
                    .store
                    .commit(Commit {
                        account,
                        new_balance: current.balance - amount,
                        amount,
                        kind: TransactionKind::Use,
                        timestamp: now,
                    })
                    .await?;
                Ok::<_, LedgerError>(snapshot)
            })
            .await
    }
}

impl<S: Store + Default> Default for Ledger<S> {
    fn default() -> Self {
        Self::new(S::default(), LedgerConfig::default())
    }
}

fn ensure_account(account: AccountId) -> Result<(), LedgerError> {
    if account == 0 {
        return Err(LedgerError::InvalidAccountId(account));
    }
    Ok(())
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            Millis::try_from(elapsed.as_millis()).unwrap_or(Millis::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::policy::{PolicyConfig, Violation};
    use crate::store::MemoryStore;

    const HOUR: Millis = 60 * 60 * 1000;

    // test utils

    fn p(value: i64) -> Points {
        Points::new(value)
    }

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::default()
    }

    fn violation(result: Result<BalanceSnapshot, LedgerError>) -> Violation {
        match result {
            Err(LedgerError::Violation(v)) => v,
            other => panic!("expected a policy violation, got {other:?}"),
        }
    }

    /// Store double that can be told to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_commits: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self, flag: &AtomicBool) -> Result<(), StoreError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn read_balance(&self, account: AccountId) -> Result<BalanceSnapshot, StoreError> {
            self.check(&self.fail_reads)?;
            self.inner.read_balance(account).await
        }

        async fn read_history(
            &self,
            account: AccountId,
        ) -> Result<Vec<TransactionRecord>, StoreError> {
            self.check(&self.fail_reads)?;
            self.inner.read_history(account).await
        }

        async fn commit(&self, commit: Commit) -> Result<BalanceSnapshot, StoreError> {
            self.check(&self.fail_commits)?;
            self.inner.commit(commit).await
        }
    }

    // Balance

    #[tokio::test]
    async fn new_account_has_zero_balance() {
        let ledger = ledger();
        let snapshot = ledger.get_balance(1).await.unwrap();
        assert_eq!(snapshot, BalanceSnapshot::empty(1));
        assert!(ledger.get_history(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupted_balance_is_a_system_fault() {
        let ledger = ledger();
        ledger.store().seed_balance(1, p(-1), 0).unwrap();
        ledger.store().seed_balance(2, p(10_000_001), 0).unwrap();

        for account in [1, 2] {
            let err = ledger.get_balance(account).await.unwrap_err();
            assert!(matches!(
                err,
                LedgerError::Violation(Violation::InvalidBalanceRange { .. })
            ));
            assert_eq!(err.class(), ErrorClass::System);
        }
    }

    #[tokio::test]
    async fn mutations_refuse_corrupted_balance() {
        let ledger = ledger();
        ledger.store().seed_balance(1, p(-500), 0).unwrap();

        let err = ledger.charge(1, p(1_000)).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::System);
        assert!(ledger.store().read_history(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_account_id_is_rejected() {
        let ledger = ledger();
        assert_eq!(
            ledger.get_balance(0).await,
            Err(LedgerError::InvalidAccountId(0))
        );
        assert_eq!(
            ledger.charge(0, p(100)).await,
            Err(LedgerError::InvalidAccountId(0))
        );
        assert!(ledger.locks().is_empty());
    }

    #[tokio::test]
    async fn reads_are_idempotent() {
        let ledger = ledger();
        ledger.charge(1, p(1_000)).await.unwrap();
        ledger.use_points(1, p(300)).await.unwrap();

        assert_eq!(
            ledger.get_balance(1).await.unwrap(),
            ledger.get_balance(1).await.unwrap()
        );
        assert_eq!(
            ledger.get_history(1).await.unwrap(),
            ledger.get_history(1).await.unwrap()
        );
    }

    // History

    #[tokio::test]
    async fn history_is_newest_first_with_id_tiebreak() {
        let ledger = ledger();
        let store = ledger.store();
        let a = store.seed_record(1, p(10), TransactionKind::Charge, 100).unwrap();
        let b = store.seed_record(1, p(20), TransactionKind::Charge, 300).unwrap();
        let c = store.seed_record(1, p(30), TransactionKind::Use, 300).unwrap();
        let d = store.seed_record(1, p(40), TransactionKind::Charge, 200).unwrap();
        store.seed_record(2, p(50), TransactionKind::Charge, 400).unwrap();

        let ids: Vec<_> = ledger
            .get_history(1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![c, b, d, a]);
    }

    // Charge

    #[tokio::test]
    async fn charge_increases_balance_and_records_history() {
        let ledger = ledger();
        let snapshot = ledger.charge(1, p(1_000)).await.unwrap();
        assert_eq!(snapshot.balance, p(1_000));
        assert!(snapshot.updated_at > 0);

        let history = ledger.get_history(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Charge);
        assert_eq!(history[0].amount, p(1_000));
        assert_eq!(history[0].timestamp, snapshot.updated_at);
    }

    #[tokio::test]
    async fn charge_zero_is_invalid() {
        let ledger = ledger();
        let err = ledger.charge(1, p(0)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::from(Violation::InvalidChargeAmount { amount: p(0) })
        );
        assert_eq!(err.class(), ErrorClass::Validation);
        // validation happens before any lock is created
        assert!(ledger.locks().is_empty());
    }

    #[tokio::test]
    async fn charge_up_to_exact_limit() {
        let ledger = ledger();
        ledger.charge(1, p(9_999_000)).await.unwrap();
        let snapshot = ledger.charge(1, p(1_000)).await.unwrap();
        assert_eq!(snapshot.balance, p(10_000_000));

        let v = violation(ledger.charge(1, p(1)).await);
        assert_eq!(
            v,
            Violation::ChargeLimitExceeded {
                balance: p(10_000_000),
                amount: p(1),
                limit: p(10_000_000),
            }
        );
        assert_eq!(ledger.get_history(1).await.unwrap().len(), 2);
    }

    // Use

    #[tokio::test]
    async fn use_decreases_balance_and_records_history() {
        let ledger = ledger();
        ledger.charge(1, p(1_000)).await.unwrap();
        let snapshot = ledger.use_points(1, p(100)).await.unwrap();
        assert_eq!(snapshot.balance, p(900));

        let history = ledger.get_history(1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(
            history
                .iter()
                .any(|r| r.kind == TransactionKind::Use && r.amount == p(100))
        );
    }

    #[tokio::test]
    async fn use_amount_boundaries() {
        let ledger = ledger();
        ledger.charge(1, p(1_000)).await.unwrap();

        assert_eq!(
            violation(ledger.use_points(1, p(99)).await),
            Violation::InvalidUseAmount { amount: p(99) }
        );
        assert_eq!(
            violation(ledger.use_points(1, p(150)).await),
            Violation::InvalidUseAmount { amount: p(150) }
        );
        assert!(ledger.use_points(1, p(100)).await.is_ok());
    }

    #[tokio::test]
    async fn use_more_than_balance_fails() {
        let ledger = ledger();
        ledger.charge(1, p(500)).await.unwrap();

        assert_eq!(
            violation(ledger.use_points(1, p(600)).await),
            Violation::InsufficientBalance {
                balance: p(500),
                amount: p(600)
            }
        );
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, p(500));
        assert_eq!(ledger.get_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn use_on_unknown_account_is_insufficient() {
        let ledger = ledger();
        assert!(matches!(
            violation(ledger.use_points(1, p(100)).await),
            Violation::InsufficientBalance { .. }
        ));
    }

    #[tokio::test]
    async fn daily_limit_counts_only_recent_uses() {
        let ledger = ledger();
        ledger.charge(1, p(100_000)).await.unwrap();
        let now = now_millis();
        let store = ledger.store();

        // outside the trailing window
        store
            .seed_record(1, p(50_000), TransactionKind::Use, now - 25 * HOUR)
            .unwrap();
        // charges never count
        store
            .seed_record(1, p(50_000), TransactionKind::Charge, now - HOUR)
            .unwrap();
        // inside the window
        store
            .seed_record(1, p(49_000), TransactionKind::Use, now - 23 * HOUR)
            .unwrap();

        ledger.use_points(1, p(1_000)).await.unwrap();
        assert_eq!(
            violation(ledger.use_points(1, p(100)).await),
            Violation::DailyUseLimitExceeded {
                used_today: p(50_000),
                amount: p(100),
                limit: p(50_000),
            }
        );
    }

    #[tokio::test]
    async fn daily_limit_reported_before_balance() {
        let ledger = ledger();
        ledger.charge(1, p(100)).await.unwrap();
        ledger
            .store()
            .seed_record(1, p(50_000), TransactionKind::Use, now_millis())
            .unwrap();

        // both rules are broken; the daily limit is checked first
        assert!(matches!(
            violation(ledger.use_points(1, p(1_000)).await),
            Violation::DailyUseLimitExceeded { .. }
        ));
    }

    fn use_record(id: u64, amount: i64, timestamp: Millis) -> TransactionRecord {
        TransactionRecord {
            id,
            account: 1,
            amount: p(amount),
            kind: TransactionKind::Use,
            timestamp,
        }
    }

    #[test]
    fn window_excludes_its_lower_edge() {
        let ledger = ledger();
        let now: Millis = 1_000_000_000;
        let edge = now - 24 * HOUR;

        let at_edge = [use_record(1, 100, edge)];
        assert_eq!(ledger.used_in_window(1, &at_edge, now), Ok(Points::ZERO));

        let inside = [use_record(1, 100, edge + 1)];
        assert_eq!(ledger.used_in_window(1, &inside, now), Ok(p(100)));
    }

    #[tokio::test]
    async fn overflowing_use_total_is_a_system_fault() {
        let ledger = ledger();
        ledger.charge(1, p(1_000)).await.unwrap();
        let now = now_millis();
        let store = ledger.store();
        store
            .seed_record(1, p(i64::MAX), TransactionKind::Use, now - HOUR)
            .unwrap();
        store
            .seed_record(1, p(100), TransactionKind::Use, now - HOUR)
            .unwrap();

        let err = ledger.use_points(1, p(100)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Corrupted(_))));
        assert_eq!(err.class(), ErrorClass::System);
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, p(1_000));
    }

    #[tokio::test]
    async fn custom_window_is_used() {
        let ledger = Ledger::new(
            MemoryStore::new(),
            LedgerConfig {
                policy: PolicyConfig {
                    daily_window: Duration::from_secs(60),
                    ..PolicyConfig::default()
                },
                ..LedgerConfig::default()
            },
        );
        ledger.charge(1, p(100_000)).await.unwrap();
        ledger
            .store()
            .seed_record(1, p(50_000), TransactionKind::Use, now_millis() - 2 * 60 * 1000)
            .unwrap();

        assert!(ledger.use_points(1, p(50_000)).await.is_ok());
    }

    // Store faults

    #[tokio::test]
    async fn store_failure_on_commit_leaves_state_untouched() {
        let ledger: Ledger<FlakyStore> = Ledger::default();
        ledger.charge(1, p(1_000)).await.unwrap();

        ledger.store().fail_commits.store(true, Ordering::SeqCst);
        let err = ledger.use_points(1, p(500)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::from(StoreError::Unavailable("injected".into()))
        );
        assert_eq!(err.class(), ErrorClass::System);

        ledger.store().fail_commits.store(false, Ordering::SeqCst);
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, p(1_000));
        assert_eq!(ledger.get_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lock_is_released_after_store_failure() {
        let ledger: Ledger<FlakyStore> = Ledger::default();
        ledger.store().fail_reads.store(true, Ordering::SeqCst);
        assert!(ledger.charge(1, p(1_000)).await.is_err());
        assert!(ledger.get_balance(1).await.is_err());

        ledger.store().fail_reads.store(false, Ordering::SeqCst);
        assert!(ledger.locks().lock_for(1).try_lock().is_ok());
        assert!(ledger.charge(1, p(1_000)).await.is_ok());
    }

    // apply() / run()

    #[tokio::test]
    async fn apply_dispatches_by_operation() {
        let ledger = ledger();
        ledger
            .apply(Operation::Charge {
                account: 1,
                amount: p(1_000),
            })
            .await
            .unwrap();
        let snapshot = ledger
            .apply(Operation::Use {
                account: 1,
                amount: p(200),
            })
            .await
            .unwrap();
        assert_eq!(snapshot.balance, p(800));
    }

    #[tokio::test]
    async fn run_skips_rejected_operations_and_continues() {
        let ledger = ledger();
        let operations = vec![
            Operation::Charge {
                account: 1,
                amount: p(1_000),
            },
            // insufficient balance
            Operation::Use {
                account: 1,
                amount: p(5_000),
            },
            Operation::Charge {
                account: 2,
                amount: p(300),
            },
            Operation::Use {
                account: 1,
                amount: p(400),
            },
        ];

        let summary = ledger.run(tokio_stream::iter(operations)).await;
        assert_eq!(
            summary,
            RunSummary {
                applied: 3,
                rejected: 1
            }
        );
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, p(600));
        assert_eq!(ledger.get_balance(2).await.unwrap().balance, p(300));
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
