use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{Account, AccountId, CreateTransferParams, Entry, LedgerError, Transfer};

/// Input of a transfer transaction.
///
/// Ownership and currency checks belong to the caller; the engine trusts
/// these values beyond the two preconditions in [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub sender: String,
    pub recipient: String,
}

impl TransferTxParams {
    /// Checked before any write
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::SameAccount);
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(())
    }

    pub(crate) fn transfer_row(&self) -> CreateTransferParams {
        CreateTransferParams {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

/// Everything a committed transfer produced, with both accounts as they
/// were right after this transfer's balance updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
