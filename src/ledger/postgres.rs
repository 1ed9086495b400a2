//! PostgreSQL ledger store
//!
//! Every scope is a `sqlx::Transaction` checked out of the pool. Balance
//! updates are single `UPDATE ... SET balance = balance + $2 RETURNING`
//! statements, so the row lock is taken by the update itself and held until
//! the transaction ends.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::error::LedgerError;
use super::executor::IsolationLevel;
use super::models::{
    Account, AccountId, CreateAccountParams, CreateTransferParams, Entry, Page, Transfer,
    TransferFilter,
};
use super::queries::{AtomicScope, LedgerBackend, Queries};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str =
    "id, from_account_id, to_account_id, amount, sender, recipient, created_at";

/// PostgreSQL-backed ledger
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    isolation: IsolationLevel,
}

impl PgLedger {
    pub fn new(pool: PgPool, isolation: IsolationLevel) -> Self {
        Self { pool, isolation }
    }
}

#[async_trait]
impl LedgerBackend for PgLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn AtomicScope>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // Must be the first statement of the transaction
        sqlx::query(self.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgScope { tx }))
    }
}

struct PgScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AtomicScope for PgScope {
    fn queries(&mut self) -> &mut dyn Queries {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let PgScope { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        let PgScope { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Queries for PgScope {
    async fn create_account(
        &mut self,
        params: &CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        let account: Account = sqlx::query_as(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        let account: Option<Account> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        account.ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        let account: Option<Account> = sqlx::query_as(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        debug!(account_id = id, delta = %delta, "Account balance updated");
        account.ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Entry, LedgerError> {
        let entry: Entry = sqlx::query_as(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        let entry: Option<Entry> = sqlx::query_as(&format!(
            "SELECT {} FROM entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        entry.ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))
    }

    async fn list_entries(
        &mut self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, LedgerError> {
        let entries: Vec<Entry> = sqlx::query_as(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        params: &CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        let transfer: Transfer = sqlx::query_as(&format!(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount, sender, recipient)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .bind(&params.sender)
        .bind(&params.recipient)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        let transfer: Option<Transfer> = sqlx::query_as(&format!(
            "SELECT {} FROM transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        transfer.ok_or_else(|| LedgerError::NotFound(format!("transfer {}", id)))
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let transfers: Vec<Transfer> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM transfers
            WHERE ($1::BIGINT IS NULL OR from_account_id = $1)
              AND ($2::BIGINT IS NULL OR to_account_id = $2)
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(filter.from_account_id)
        .bind(filter.to_account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transfers)
    }
}
