//! Ledger store ports
//!
//! Three layers, each implemented once per backend:
//!
//! - [`LedgerBackend`] - shared, thread-safe handle that opens transaction scopes
//! - [`AtomicScope`] - one exclusive transaction; released by commit, rollback or drop
//! - [`Queries`] - row-level operations executed inside a scope
//!
//! None of the operations retry internally.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::models::{
    Account, AccountId, CreateAccountParams, CreateTransferParams, Entry, Page, Transfer,
    TransferFilter,
};

/// Row-level ledger operations
#[async_trait]
pub trait Queries: Send {
    // === Accounts ===

    /// Fails with `ConstraintViolation` on a duplicate `(owner, currency)`
    async fn create_account(&mut self, params: &CreateAccountParams)
    -> Result<Account, LedgerError>;

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError>;

    /// Apply `delta` at the storage layer (`balance = balance + delta`) and
    /// return the updated row. Takes the account's row lock until the scope ends.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError>;

    /// Fails with `ConstraintViolation` while entries or transfers reference the account
    async fn delete_account(&mut self, id: AccountId) -> Result<(), LedgerError>;

    // === Entries ===

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Entry, LedgerError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError>;

    async fn list_entries(
        &mut self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, LedgerError>;

    // === Transfers ===

    async fn create_transfer(
        &mut self,
        params: &CreateTransferParams,
    ) -> Result<Transfer, LedgerError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError>;

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, LedgerError>;
}

/// An open transaction.
///
/// Dropping a scope without calling [`commit`](AtomicScope::commit) discards
/// every write made through it and releases its locks and connection.
#[async_trait]
pub trait AtomicScope: Send {
    fn queries(&mut self) -> &mut dyn Queries;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Storage backend shared by all concurrent callers
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Check out a connection and begin a transaction on it
    async fn begin(&self) -> Result<Box<dyn AtomicScope>, LedgerError>;
}
