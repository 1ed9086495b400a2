//! Atomic fund transfers
//!
//! Moves an amount from one account to another inside a single ledger
//! transaction: one transfer row, a debit and a credit entry, and both
//! balance updates become visible together or not at all.
//!
//! # Lock ordering
//!
//! ```text
//! A → B (A < B):  lock A, lock B
//! B → A (A < B):  lock A, lock B
//! ```
//!
//! Balance updates always lock the lower account id first, so concurrent
//! transfers in opposite directions cannot wait on each other in a cycle.
//!
//! # Failure model
//!
//! - Invalid params are rejected before the transaction begins
//! - Any failing step rolls back every write of the transfer
//! - `RetryableConflict` means nothing was persisted and the call can be
//!   reissued as a whole; [`TransferEngine::transfer_tx_with_retry`] does that
//! - Balances may go negative

pub mod engine;
pub mod types;


pub use engine::TransferEngine;
pub use types::{TransferTxParams, TransferTxResult};
