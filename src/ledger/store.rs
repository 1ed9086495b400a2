//! Shared store handle
//!
//! `Store` is what callers hold: a cheap-to-clone handle over one backend.
//! [`Store::run_atomic`] is the transaction executor entry point; the other
//! methods run a single row operation in its own transaction.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::PgPool;

use super::error::LedgerError;
use super::executor::{self, AtomicWork, IsolationLevel};
use super::memory::MemoryLedger;
use super::models::{
    Account, AccountId, CreateAccountParams, CreateTransferParams, Entry, Page, Transfer,
    TransferFilter,
};
use super::postgres::PgLedger;
use super::queries::{LedgerBackend, Queries};

#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn LedgerBackend>,
}

impl Store {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self { backend }
    }

    pub fn postgres(pool: PgPool, isolation: IsolationLevel) -> Self {
        Self::new(Arc::new(PgLedger::new(pool, isolation)))
    }

    pub fn memory(ledger: MemoryLedger) -> Self {
        Self::new(Arc::new(ledger))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `work` inside one atomic, isolated transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back otherwise. Errors keep
    /// their kind; transient conflicts come back as `RetryableConflict`.
    pub async fn run_atomic<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut dyn Queries) -> AtomicWork<'c, T> + Send,
    {
        executor::run_atomic(self.backend.as_ref(), work).await
    }

    // === Single-statement operations ===

    pub async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.create_account(&params).await }))
            .await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.get_account(id).await }))
            .await
    }

    pub async fn add_account_balance(
        &self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.add_account_balance(id, delta).await }))
            .await
    }

    pub async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.delete_account(id).await }))
            .await
    }

    pub async fn create_entry(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Entry, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.create_entry(account_id, amount).await }))
            .await
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.get_entry(id).await }))
            .await
    }

    pub async fn list_entries(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.list_entries(account_id, page).await }))
            .await
    }

    pub async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.create_transfer(&params).await }))
            .await
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.get_transfer(id).await }))
            .await
    }

    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, LedgerError> {
        self.run_atomic(move |q| Box::pin(async move { q.list_transfers(filter, page).await }))
            .await
    }
}
