//! Ledger rows: accounts, entries (ledger lines) and transfers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account identity. Also the total order used for row-lock acquisition.
pub type AccountId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger line. Negative amount is a debit, positive a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Immutable transfer record. `sender` and `recipient` are the account
/// owners captured at transfer time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub sender: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub sender: String,
    pub recipient: String,
}

/// Transfer listing filter. `None` on a side means "any account".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
}

impl TransferFilter {
    pub fn from_account(id: AccountId) -> Self {
        Self {
            from_account_id: Some(id),
            to_account_id: None,
        }
    }

    pub fn to_account(id: AccountId) -> Self {
        Self {
            from_account_id: None,
            to_account_id: Some(id),
        }
    }

    pub fn between(from: AccountId, to: AccountId) -> Self {
        Self {
            from_account_id: Some(from),
            to_account_id: Some(to),
        }
    }

    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.from_account_id
            .is_none_or(|id| id == transfer.from_account_id)
            && self.to_account_id.is_none_or(|id| id == transfer.to_account_id)
    }
}

/// Offset pagination, ordered by row id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.max(0),
            offset: offset.max(0),
        }
    }

    pub fn first(limit: i64) -> Self {
        Self::new(limit, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: AccountId, to: AccountId) -> Transfer {
        Transfer {
            id: 1,
            from_account_id: from,
            to_account_id: to,
            amount: Decimal::from(10),
            sender: "alice".into(),
            recipient: "bob".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_transfer_filter() {
        let t = transfer(1, 2);
        assert!(TransferFilter::default().matches(&t));
        assert!(TransferFilter::from_account(1).matches(&t));
        assert!(!TransferFilter::from_account(2).matches(&t));
        assert!(TransferFilter::to_account(2).matches(&t));
        assert!(TransferFilter::between(1, 2).matches(&t));
        assert!(!TransferFilter::between(2, 1).matches(&t));
    }

    #[test]
    fn test_page_clamps_negative() {
        assert_eq!(Page::new(-5, -1), Page { limit: 0, offset: 0 });
        assert_eq!(Page::first(10), Page { limit: 10, offset: 0 });
    }

    #[test]
    fn test_decimal_serializes_as_string() {
        let json = serde_json::to_value(transfer(1, 2)).unwrap();
        assert_eq!(json["amount"], "10");
    }
}
