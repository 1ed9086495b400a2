//! simple_bank - atomic fund transfers over a double-entry ledger
//!
//! # Modules
//!
//! - [`ledger`] - Accounts, entries and transfers, plus the transaction executor
//! - [`transfer`] - Transfer engine: one transfer, two entries, two balance updates, atomically
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use ledger::{
    Account, AccountId, Entry, IsolationLevel, LedgerError, MemoryLedger, RetryPolicy, Store,
    Transfer,
};
pub use transfer::{TransferEngine, TransferTxParams, TransferTxResult};
