//! Ledger Store
//!
//! Accounts, append-only entries and transfers, plus the transaction
//! executor that runs a unit of work against them atomically.
//!
//! # Backends
//!
//! - [`PgLedger`] - PostgreSQL via `sqlx`, the production store
//! - [`MemoryLedger`] - in-process store with row locks and fault injection
//!
//! # Usage
//!
//! ```ignore
//! let store = Store::postgres(pool, IsolationLevel::ReadCommitted);
//! let account = store
//!     .run_atomic(|q| Box::pin(async move { q.add_account_balance(1, delta).await }))
//!     .await?;
//! ```

pub mod error;
pub mod executor;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod queries;
pub mod store;

pub use error::LedgerError;
pub use executor::{AtomicWork, IsolationLevel, RetryPolicy, retry_on_conflict};
pub use memory::{FailPoint, Fault, MemoryLedger};
pub use models::{
    Account, AccountId, CreateAccountParams, CreateTransferParams, Entry, Page, Transfer,
    TransferFilter,
};
pub use postgres::PgLedger;
pub use queries::{AtomicScope, LedgerBackend, Queries};
pub use store::Store;
