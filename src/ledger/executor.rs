//! Transaction Executor
//!
//! Runs a unit of work inside one atomic scope: commit on `Ok`, rollback on
//! `Err`, and release on every other exit path (the scope is owned by the
//! executor's future, so a panic or a dropped future discards it).
//!
//! Retry is not part of the scope. [`retry_on_conflict`] re-issues a whole
//! operation when it failed with a retryable conflict, which is safe because
//! a failed scope leaves nothing behind.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::error::LedgerError;
use super::queries::{LedgerBackend, Queries};

/// Future returned by a unit of work, borrowing the scope's queries for `'c`
pub type AtomicWork<'c, T> = BoxFuture<'c, Result<T, LedgerError>>;

/// Transaction isolation level applied to every scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn set_transaction_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Run `work` inside one transaction on `backend`
pub async fn run_atomic<T, F>(backend: &dyn LedgerBackend, work: F) -> Result<T, LedgerError>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut dyn Queries) -> AtomicWork<'c, T> + Send,
{
    let mut scope = backend.begin().await?;

    let outcome = work(scope.queries()).await;

    match outcome {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(err) => match scope.rollback().await {
            Ok(()) => {
                warn!(backend = backend.name(), error = %err, "Transaction rolled back");
                Err(err)
            }
            Err(rollback_err) => {
                error!(
                    backend = backend.name(),
                    error = %err,
                    rollback_error = %rollback_err,
                    "Transaction rollback failed"
                );
                Err(LedgerError::RollbackFailed {
                    cause: Box::new(err),
                    detail: rollback_err.to_string(),
                })
            }
        },
    }
}

/// Retry policy for [`retry_on_conflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first conflict, doubled after each further one
    pub initial_backoff: Duration,
}

/// Backoff stops doubling after this many conflicts
const MAX_BACKOFF_SHIFT: u32 = 8;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `failed + 1`, after `failed` conflicts (1-based)
    pub fn backoff(&self, failed: u32) -> Duration {
        let shift = failed.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.initial_backoff.saturating_mul(1u32 << shift)
    }
}

/// Re-issue `op` while it fails with a retryable conflict
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable conflict - reissuing operation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
