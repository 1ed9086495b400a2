//! In-process ledger store
//!
//! Mirrors the observable behavior of the PostgreSQL store at READ COMMITTED:
//!
//! - Writes are buffered in the scope and applied under one lock on commit,
//!   so other scopes never see partial state.
//! - `add_account_balance` and `delete_account` take a per-account row lock
//!   held until the scope ends. Waiting for a lock is bounded by
//!   `lock_timeout`, which surfaces as `RetryableConflict` (PostgreSQL
//!   `lock_timeout` / 55P03).
//! - Ids come from sequences that are not rolled back.
//! - Unique `(owner, currency)`, foreign keys and the transfer CHECKs are
//!   enforced and reported as `ConstraintViolation`.
//! - Money is stored as `NUMERIC(30, 8)`: rounded half away from zero to 8
//!   places, and values of 10^22 or more fail as `StorageFailure` (22003).
//!
//! Faults can be armed at named points to exercise rollback paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::error::LedgerError;
use super::models::{
    Account, AccountId, CreateAccountParams, CreateTransferParams, Entry, Page, Transfer,
    TransferFilter,
};
use super::queries::{AtomicScope, LedgerBackend, Queries};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Fractional digits of the money columns
const NUMERIC_SCALE: u32 = 8;
/// Integer digits of the money columns: NUMERIC(30, 8)
const NUMERIC_INTEGER_DIGITS: u32 = 22;

fn numeric_overflow(value: impl std::fmt::Display) -> LedgerError {
    LedgerError::StorageFailure(format!(
        "numeric field overflow: {} does not fit NUMERIC(30, 8)",
        value
    ))
}

/// Coerce a value the way a NUMERIC(30, 8) column does on write
fn to_numeric(value: Decimal) -> Result<Decimal, LedgerError> {
    let rounded =
        value.round_dp_with_strategy(NUMERIC_SCALE, RoundingStrategy::MidpointAwayFromZero);
    let limit = Decimal::from_i128_with_scale(10i128.pow(NUMERIC_INTEGER_DIGITS), 0);
    if rounded.abs() >= limit {
        return Err(numeric_overflow(value));
    }
    Ok(rounded)
}

fn add_numeric(a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_add(b)
        .ok_or_else(|| numeric_overflow(format!("{} + {}", a, b)))
        .and_then(to_numeric)
}

/// Where an armed fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateTransfer,
    CreateEntry,
    AddAccountBalance,
    Commit,
    Rollback,
}

/// What an armed fault returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `StorageFailure`, e.g. a dropped connection
    Storage,
    /// `RetryableConflict`, e.g. a serialization failure
    Conflict,
}

impl Fault {
    fn to_error(self, point: FailPoint) -> LedgerError {
        match self {
            Fault::Storage => LedgerError::StorageFailure(format!("injected fault at {:?}", point)),
            Fault::Conflict => {
                LedgerError::RetryableConflict(format!("injected conflict at {:?}", point))
            }
        }
    }
}

struct ArmedFault {
    /// Calls that pass before the fault fires
    skip: usize,
    fault: Fault,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<HashMap<FailPoint, ArmedFault>>,
    lock_timeout: Duration,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    /// Consume an armed fault at `point`, if one is due
    fn trip(&self, point: FailPoint) -> Result<(), LedgerError> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(armed) = faults.get_mut(&point) else {
            return Ok(());
        };
        if armed.skip > 0 {
            armed.skip -= 1;
            return Ok(());
        }
        let fault = armed.fault;
        faults.remove(&point);
        Err(fault.to_error(point))
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory ledger backend. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                lock_timeout,
                account_seq: AtomicI64::new(0),
                entry_seq: AtomicI64::new(0),
                transfer_seq: AtomicI64::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail the next call that reaches `point`
    pub fn inject_fault(&self, point: FailPoint, fault: Fault) {
        self.inject_fault_after(point, fault, 0);
    }

    /// Let `skip` calls through `point`, then fail the next one
    pub fn inject_fault_after(&self, point: FailPoint, fault: Fault, skip: usize) {
        let mut faults = self.inner.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.insert(point, ArmedFault { skip, fault });
    }

    pub fn clear_faults(&self) {
        let mut faults = self.inner.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.clear();
    }

    /// Committed entry rows
    pub fn entry_count(&self) -> usize {
        self.inner.tables().entries.len()
    }

    /// Committed transfer rows
    pub fn transfer_count(&self) -> usize {
        self.inner.tables().transfers.len()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn AtomicScope>, LedgerError> {
        Ok(Box::new(MemScope {
            inner: Arc::clone(&self.inner),
            held: HashMap::new(),
            deltas: HashMap::new(),
            new_accounts: Vec::new(),
            deleted: Vec::new(),
            new_entries: Vec::new(),
            new_transfers: Vec::new(),
        }))
    }
}

/// Pending writes and held row locks of one transaction
struct MemScope {
    inner: Arc<Inner>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    deltas: HashMap<AccountId, Decimal>,
    new_accounts: Vec<Account>,
    deleted: Vec<AccountId>,
    new_entries: Vec<Entry>,
    new_transfers: Vec<Transfer>,
}

impl MemScope {
    /// The row without this scope's pending balance delta
    fn base_account(&self, id: AccountId) -> Option<Account> {
        if self.deleted.contains(&id) {
            return None;
        }
        self.new_accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .or_else(|| self.inner.tables().accounts.get(&id).cloned())
    }

    /// The account as this scope sees it: committed row or own insert,
    /// plus own uncommitted balance delta
    fn visible_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let Some(mut account) = self.base_account(id) else {
            return Ok(None);
        };
        if let Some(delta) = self.deltas.get(&id) {
            account.balance = add_numeric(account.balance, *delta)?;
        }
        Ok(Some(account))
    }

    fn foreign_key(&self, id: AccountId, table: &str) -> Result<(), LedgerError> {
        if self.base_account(id).is_none() {
            return Err(LedgerError::ConstraintViolation(format!(
                "insert on table \"{}\" violates foreign key constraint: account {} does not exist",
                table, id
            )));
        }
        Ok(())
    }

    /// Take the account's row lock for the rest of the scope
    async fn lock_row(&mut self, id: AccountId) -> Result<(), LedgerError> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let lock = self.inner.row_lock(id);
        let guard = tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::RetryableConflict(format!(
                    "lock timeout after {}ms waiting for account {}",
                    self.inner.lock_timeout.as_millis(),
                    id
                ))
            })?;
        debug!(account_id = id, "Row lock acquired");
        self.held.insert(id, guard);
        Ok(())
    }

    fn is_referenced(&self, tables: &Tables, id: AccountId) -> bool {
        tables.entries.values().any(|e| e.account_id == id)
            || tables
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
            || self.new_entries.iter().any(|e| e.account_id == id)
            || self
                .new_transfers
                .iter()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
    }

    /// Re-check constraints against the latest committed state and apply.
    /// Nothing is written unless every check passes.
    fn apply(&mut self, tables: &mut Tables) -> Result<(), LedgerError> {
        for account in &self.new_accounts {
            let duplicate = tables
                .accounts
                .values()
                .any(|a| a.owner == account.owner && a.currency == account.currency);
            if duplicate {
                return Err(duplicate_owner_currency(account));
            }
        }

        let exists = |tables: &Tables, id: AccountId| {
            !self.deleted.contains(&id)
                && (tables.accounts.contains_key(&id)
                    || self.new_accounts.iter().any(|a| a.id == id))
        };
        for entry in &self.new_entries {
            if !exists(&*tables, entry.account_id) {
                return Err(LedgerError::ConstraintViolation(format!(
                    "entry references missing account {}",
                    entry.account_id
                )));
            }
        }
        for transfer in &self.new_transfers {
            if !exists(&*tables, transfer.from_account_id) || !exists(&*tables, transfer.to_account_id)
            {
                return Err(LedgerError::ConstraintViolation(format!(
                    "transfer {} references a missing account",
                    transfer.id
                )));
            }
        }

        for &id in &self.deleted {
            let referenced = tables.entries.values().any(|e| e.account_id == id)
                || tables
                    .transfers
                    .values()
                    .any(|t| t.from_account_id == id || t.to_account_id == id);
            if referenced {
                return Err(LedgerError::ConstraintViolation(format!(
                    "delete on table \"accounts\" violates foreign key constraint: account {} is still referenced",
                    id
                )));
            }
        }

        let mut balances = Vec::with_capacity(self.deltas.len());
        for (&id, &delta) in &self.deltas {
            let base = tables
                .accounts
                .get(&id)
                .or_else(|| self.new_accounts.iter().find(|a| a.id == id))
                .map(|a| a.balance);
            if let Some(base) = base {
                balances.push((id, add_numeric(base, delta)?));
            }
        }

        for account in self.new_accounts.drain(..) {
            tables.accounts.insert(account.id, account);
        }
        for (id, balance) in balances {
            if let Some(account) = tables.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        self.deltas.clear();
        for id in self.deleted.drain(..) {
            tables.accounts.remove(&id);
        }
        for entry in self.new_entries.drain(..) {
            tables.entries.insert(entry.id, entry);
        }
        for transfer in self.new_transfers.drain(..) {
            tables.transfers.insert(transfer.id, transfer);
        }
        Ok(())
    }
}

fn duplicate_owner_currency(account: &Account) -> LedgerError {
    LedgerError::ConstraintViolation(format!(
        "duplicate key value violates unique constraint \"owner_currency_key\": ({}, {})",
        account.owner, account.currency
    ))
}

#[async_trait]
impl AtomicScope for MemScope {
    fn queries(&mut self) -> &mut dyn Queries {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let mut scope = self;
        let inner = Arc::clone(&scope.inner);
        if let Err(e) = inner.trip(FailPoint::Commit) {
            inner.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        let applied = {
            let mut tables = inner.tables();
            scope.apply(&mut tables)
        };
        // row locks are released when the scope drops, after the writes are visible
        drop(scope);

        match applied {
            Ok(()) => {
                inner.commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                inner.rollbacks.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        // pending writes are discarded with the scope either way
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.trip(FailPoint::Rollback)
    }
}

#[async_trait]
impl Queries for MemScope {
    async fn create_account(
        &mut self,
        params: &CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        let balance = to_numeric(params.balance)?;
        let account = Account {
            id: Inner::next_id(&self.inner.account_seq),
            owner: params.owner.clone(),
            balance,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };

        let duplicate = self
            .new_accounts
            .iter()
            .any(|a| a.owner == account.owner && a.currency == account.currency)
            || self
                .inner
                .tables()
                .accounts
                .values()
                .any(|a| a.owner == account.owner && a.currency == account.currency);
        if duplicate {
            return Err(duplicate_owner_currency(&account));
        }

        self.new_accounts.push(account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        self.visible_account(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        self.inner.trip(FailPoint::AddAccountBalance)?;
        if self.base_account(id).is_none() {
            return Err(LedgerError::NotFound(format!("account {}", id)));
        }

        self.lock_row(id).await?;

        // the row may have been deleted while we waited for the lock
        let (Some(base), Some(mut account)) = (self.base_account(id), self.visible_account(id)?)
        else {
            return Err(LedgerError::NotFound(format!("account {}", id)));
        };
        account.balance = add_numeric(account.balance, delta)?;

        // each update is rounded on its own, as the column does
        let pending = account.balance - base.balance;
        self.deltas.insert(id, pending);

        Ok(account)
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<(), LedgerError> {
        if self.base_account(id).is_none() {
            return Err(LedgerError::NotFound(format!("account {}", id)));
        }

        self.lock_row(id).await?;

        let referenced = {
            let tables = self.inner.tables();
            self.is_referenced(&tables, id)
        };
        if referenced {
            return Err(LedgerError::ConstraintViolation(format!(
                "delete on table \"accounts\" violates foreign key constraint: account {} is still referenced",
                id
            )));
        }

        self.new_accounts.retain(|a| a.id != id);
        self.deltas.remove(&id);
        self.deleted.push(id);
        Ok(())
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Entry, LedgerError> {
        self.inner.trip(FailPoint::CreateEntry)?;
        self.foreign_key(account_id, "entries")?;
        let amount = to_numeric(amount)?;

        let entry = Entry {
            id: Inner::next_id(&self.inner.entry_seq),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.new_entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        self.new_entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .or_else(|| self.inner.tables().entries.get(&id).cloned())
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))
    }

    async fn list_entries(
        &mut self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, LedgerError> {
        let mut entries: Vec<Entry> = self
            .inner
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.extend(
            self.new_entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);

        Ok(paginate(entries, page))
    }

    async fn create_transfer(
        &mut self,
        params: &CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        self.inner.trip(FailPoint::CreateTransfer)?;

        if params.from_account_id == params.to_account_id {
            return Err(LedgerError::ConstraintViolation(
                "new row for relation \"transfers\" violates check constraint \"transfers_distinct_accounts\"".to_string(),
            ));
        }
        let amount = to_numeric(params.amount)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::ConstraintViolation(
                "new row for relation \"transfers\" violates check constraint \"transfers_amount_positive\"".to_string(),
            ));
        }
        self.foreign_key(params.from_account_id, "transfers")?;
        self.foreign_key(params.to_account_id, "transfers")?;

        let transfer = Transfer {
            id: Inner::next_id(&self.inner.transfer_seq),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount,
            sender: params.sender.clone(),
            recipient: params.recipient.clone(),
            created_at: Utc::now(),
        };
        self.new_transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        self.new_transfers
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .or_else(|| self.inner.tables().transfers.get(&id).cloned())
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {}", id)))
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let mut transfers: Vec<Transfer> = self
            .inner
            .tables()
            .transfers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        transfers.extend(self.new_transfers.iter().filter(|t| filter.matches(t)).cloned());
        transfers.sort_by_key(|t| t.id);

        Ok(paginate(transfers, page))
    }
}

fn paginate<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    rows.into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}
