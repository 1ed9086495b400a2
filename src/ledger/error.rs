//! Ledger Error Types
//!
//! A single error enum is shared by the row-level store, the transaction
//! executor and the transfer engine, so a storage failure keeps its kind all
//! the way up to the caller.

use thiserror::Error;

/// SQLSTATE: serialization_failure
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE: deadlock_detected
const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE: lock_not_available (lock_timeout expired)
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE class 23: integrity constraint violation
const INTEGRITY_CONSTRAINT_CLASS: &str = "23";

#[derive(Error, Debug)]
pub enum LedgerError {
    // === Validation Errors (rejected before any write) ===
    #[error("Source and destination accounts are the same")]
    SameAccount,

    #[error("Invalid amount: must be positive")]
    InvalidAmount,

    // === Storage Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Serialization failure, deadlock or lock timeout. The transaction left
    /// no persisted state, so the whole call may be reissued.
    #[error("Retryable conflict: {0}")]
    RetryableConflict(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    // === Executor Errors ===
    /// The caller gave up on the operation. If COMMIT was already sent the
    /// work may have persisted; this does not mean nothing was written.
    #[error("Transaction cancelled: {0}")]
    Cancelled(String),

    #[error("{cause} (rollback failed: {detail})")]
    RollbackFailed {
        #[source]
        cause: Box<LedgerError>,
        detail: String,
    },
}

impl LedgerError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            LedgerError::RetryableConflict(_) => "RETRYABLE_CONFLICT",
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
            LedgerError::Cancelled(_) => "CANCELLED",
            LedgerError::RollbackFailed { cause, .. } => cause.code(),
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::SameAccount | LedgerError::InvalidAmount => 400,
            LedgerError::NotFound(_) => 404,
            LedgerError::ConstraintViolation(_) => 403,
            LedgerError::RetryableConflict(_) => 409,
            LedgerError::Cancelled(_) => 408,
            LedgerError::StorageFailure(_) => 500,
            LedgerError::RollbackFailed { .. } => 500,
        }
    }

    /// Whether reissuing the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::RetryableConflict(_) => true,
            LedgerError::RollbackFailed { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            LedgerError::NotFound(_) => true,
            LedgerError::RollbackFailed { cause, .. } => cause.is_not_found(),
            _ => false,
        }
    }

    /// Map a PostgreSQL SQLSTATE to an error kind
    pub fn from_sqlstate(code: &str, message: String) -> Self {
        match code {
            SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE => {
                LedgerError::RetryableConflict(message)
            }
            c if c.starts_with(INTEGRITY_CONSTRAINT_CLASS) => {
                LedgerError::ConstraintViolation(message)
            }
            _ => LedgerError::StorageFailure(message),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row".to_string()),
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.code() {
                    Some(code) => LedgerError::from_sqlstate(&code, message),
                    None => LedgerError::StorageFailure(message),
                }
            }
            other => LedgerError::StorageFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        for code in ["40001", "40P01", "55P03"] {
            let err = LedgerError::from_sqlstate(code, "conflict".into());
            assert!(err.is_retryable(), "{} should be retryable", code);
        }

        for code in ["23505", "23503", "23514", "23502"] {
            let err = LedgerError::from_sqlstate(code, "constraint".into());
            assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
        }

        let err = LedgerError::from_sqlstate("08006", "connection failure".into());
        assert_eq!(err.code(), "STORAGE_FAILURE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = LedgerError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_rollback_failure_keeps_cause_kind() {
        let err = LedgerError::RollbackFailed {
            cause: Box::new(LedgerError::RetryableConflict("deadlock".into())),
            detail: "connection reset".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.code(), "RETRYABLE_CONFLICT");
        assert_eq!(
            err.to_string(),
            "Retryable conflict: deadlock (rollback failed: connection reset)"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::SameAccount.http_status(), 400);
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(
            LedgerError::ConstraintViolation("dup".into()).http_status(),
            403
        );
        assert_eq!(LedgerError::StorageFailure("io".into()).http_status(), 500);
    }
}
