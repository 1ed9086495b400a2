//! Transfer Engine
//!
//! Moves money between two accounts in one transaction:
//!
//! ```text
//! create_transfer → create_entry(from, -amount) → create_entry(to, +amount)
//!                 → add_account_balance × 2 (lower account id first)
//! ```
//!
//! Balance updates take row locks. Two transfers between the same pair of
//! accounts in opposite directions lock the rows in the same order, so they
//! queue behind each other instead of deadlocking.

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::types::{TransferTxParams, TransferTxResult};
use crate::ledger::{
    Account, AccountId, LedgerError, Queries, RetryPolicy, Store, retry_on_conflict,
};

/// Stateless transfer engine. Clones share the same store handle.
#[derive(Clone)]
pub struct TransferEngine {
    store: Store,
    retry: RetryPolicy,
}

impl TransferEngine {
    pub fn new(store: Store) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Store, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Execute one transfer atomically.
    ///
    /// Invalid params are rejected before any write. Storage errors are
    /// returned with their kind intact; nothing is retried here.
    pub async fn transfer_tx(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, LedgerError> {
        params.validate()?;

        let (from, to, amount) = (params.from_account_id, params.to_account_id, params.amount);

        let result = self
            .store
            .run_atomic(move |q| Box::pin(async move { execute_transfer(q, &params).await }))
            .await;

        match &result {
            Ok(r) => info!(
                transfer_id = r.transfer.id,
                from_account_id = from,
                to_account_id = to,
                amount = %amount,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from_account_id = from,
                to_account_id = to,
                amount = %amount,
                code = e.code(),
                error = %e,
                "Transfer failed"
            ),
        }

        result
    }

    /// [`transfer_tx`](Self::transfer_tx), reissued on retryable conflicts
    /// under the engine's retry policy
    pub async fn transfer_tx_with_retry(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, LedgerError> {
        retry_on_conflict(&self.retry, || self.transfer_tx(params.clone())).await
    }

    /// Abort the transfer if it has not committed within `timeout`.
    ///
    /// A `Cancelled` result means the outcome is unknown: if the deadline
    /// hit while COMMIT was in flight the transfer may have persisted.
    /// Look it up with `get_transfer` or `list_transfers` before reissuing.
    pub async fn transfer_tx_with_timeout(
        &self,
        params: TransferTxParams,
        timeout: Duration,
    ) -> Result<TransferTxResult, LedgerError> {
        match tokio::time::timeout(timeout, self.transfer_tx(params)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Cancelled(format!(
                "transfer timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Abort the transfer when `cancel` completes first.
    ///
    /// The in-flight transaction is dropped, which rolls it back and releases
    /// its connection. Cancelling during COMMIT leaves the outcome unknown,
    /// as for [`transfer_tx_with_timeout`](Self::transfer_tx_with_timeout).
    pub async fn transfer_tx_until<C>(
        &self,
        params: TransferTxParams,
        cancel: C,
    ) -> Result<TransferTxResult, LedgerError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.transfer_tx(params) => result,
            _ = cancel => Err(LedgerError::Cancelled("transfer cancelled by caller".to_string())),
        }
    }
}

async fn execute_transfer(
    q: &mut dyn Queries,
    params: &TransferTxParams,
) -> Result<TransferTxResult, LedgerError> {
    // an absent account is reported as such rather than as a foreign key violation
    q.get_account(params.from_account_id).await?;
    q.get_account(params.to_account_id).await?;

    let transfer = q.create_transfer(&params.transfer_row()).await?;

    let from_entry = q.create_entry(params.from_account_id, -params.amount).await?;
    let to_entry = q.create_entry(params.to_account_id, params.amount).await?;

    let (from_account, to_account) = if params.from_account_id < params.to_account_id {
        add_money(
            q,
            params.from_account_id,
            -params.amount,
            params.to_account_id,
            params.amount,
        )
        .await?
    } else {
        let (to_account, from_account) = add_money(
            q,
            params.to_account_id,
            params.amount,
            params.from_account_id,
            -params.amount,
        )
        .await?;
        (from_account, to_account)
    };

    Ok(TransferTxResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

/// Apply two balance deltas in the given order. Callers pass the lower id first.
async fn add_money(
    q: &mut dyn Queries,
    first_id: AccountId,
    first_delta: Decimal,
    second_id: AccountId,
    second_delta: Decimal,
) -> Result<(Account, Account), LedgerError> {
    debug!(first_id, second_id, "Updating balances in account id order");
    let first = q.add_account_balance(first_id, first_delta).await?;
    let second = q.add_account_balance(second_id, second_delta).await?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CreateAccountParams, MemoryLedger};

    async fn setup() -> (TransferEngine, Account, Account) {
        let engine = TransferEngine::new(Store::memory(MemoryLedger::new()));
        let mut accounts = Vec::new();
        for owner in ["alice", "bob"] {
            let account = engine
                .store()
                .create_account(CreateAccountParams {
                    owner: owner.to_string(),
                    currency: "USD".to_string(),
                    balance: Decimal::from(100),
                })
                .await
                .unwrap();
            accounts.push(account);
        }
        let bob = accounts.pop().unwrap();
        let alice = accounts.pop().unwrap();
        (engine, alice, bob)
    }

    fn params(from: &Account, to: &Account, amount: i64) -> TransferTxParams {
        TransferTxParams {
            from_account_id: from.id,
            to_account_id: to.id,
            amount: Decimal::from(amount),
            sender: from.owner.clone(),
            recipient: to.owner.clone(),
        }
    }

    #[tokio::test]
    async fn test_transfer_result_composition() {
        let (engine, alice, bob) = setup().await;

        let result = engine.transfer_tx(params(&alice, &bob, 30)).await.unwrap();

        assert_eq!(result.transfer.from_account_id, alice.id);
        assert_eq!(result.transfer.to_account_id, bob.id);
        assert_eq!(result.transfer.amount, Decimal::from(30));
        assert_eq!(result.transfer.sender, "alice");
        assert_eq!(result.transfer.recipient, "bob");

        assert_eq!(result.from_entry.account_id, alice.id);
        assert_eq!(result.from_entry.amount, Decimal::from(-30));
        assert_eq!(result.to_entry.account_id, bob.id);
        assert_eq!(result.to_entry.amount, Decimal::from(30));

        assert_eq!(result.from_account.id, alice.id);
        assert_eq!(result.from_account.balance, Decimal::from(70));
        assert_eq!(result.to_account.id, bob.id);
        assert_eq!(result.to_account.balance, Decimal::from(130));
    }

    #[tokio::test]
    async fn test_reverse_direction_maps_accounts_back() {
        let (engine, alice, bob) = setup().await;
        assert!(alice.id < bob.id);

        // higher id sends: balances are updated recipient first
        let result = engine.transfer_tx(params(&bob, &alice, 25)).await.unwrap();

        assert_eq!(result.from_account.id, bob.id);
        assert_eq!(result.from_account.balance, Decimal::from(75));
        assert_eq!(result.to_account.id, alice.id);
        assert_eq!(result.to_account.balance, Decimal::from(125));
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_before_write() {
        let (engine, alice, bob) = setup().await;

        let err = engine.transfer_tx(params(&alice, &alice, 10)).await.unwrap_err();
        assert_eq!(err.code(), "SAME_ACCOUNT");

        let err = engine.transfer_tx(params(&alice, &bob, 0)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let err = engine.transfer_tx(params(&alice, &bob, -10)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let transfers = engine
            .store()
            .list_transfers(Default::default(), crate::ledger::Page::first(10))
            .await
            .unwrap();
        assert!(transfers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_aborts_transfer() {
        let (engine, alice, _bob) = setup().await;
        let mut p = params(&alice, &alice, 10);
        p.to_account_id = alice.id + 100;

        let err = engine.transfer_tx(p).await.unwrap_err();
        assert!(err.is_not_found());

        let unchanged = engine.store().get_account(alice.id).await.unwrap();
        assert_eq!(unchanged.balance, Decimal::from(100));
    }
}
