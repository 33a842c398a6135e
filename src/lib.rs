pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod points;
pub mod policy;
pub mod store;

pub use config::{ConfigError, LedgerConfig};
pub use engine::{ErrorClass, Ledger, LedgerError, RunSummary};
pub use model::{AccountId, BalanceSnapshot, Operation, TransactionKind, TransactionRecord, TxId};
pub use points::Points;
pub use policy::{Policy, PolicyConfig, Violation};
pub use store::{MemoryStore, Store, StoreError};
