//! Ledger Error Types
//!
//! One taxonomy for the store, the transaction executor and the transfer
//! orchestrator. The API layer maps these to responses via [`LedgerError::http_status`].

use std::fmt;

use thiserror::Error;

/// SQLSTATE codes that PostgreSQL raises for transient conflicts
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Integrity violations
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which end of a transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Commit,
    Rollback,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStage::Commit => write!(f, "commit"),
            TxStage::Rollback => write!(f, "rollback"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    // === Transient Errors ===
    /// Lock or serialization conflict. Retried by the orchestrator.
    #[error("Conflict: {0}")]
    Conflict(String),

    // === System Errors ===
    /// Commit or rollback itself failed.
    ///
    /// For a failed commit, `cause` is the classified commit error.
    /// For a failed rollback, `cause` is the unit-of-work error that
    /// triggered the rollback.
    #[error("Transaction {stage} failed: {reason}")]
    Transaction {
        stage: TxStage,
        reason: String,
        cause: Option<Box<LedgerError>>,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::Transaction { .. } => "TRANSACTION_ERROR",
            LedgerError::Persistence(_) => "PERSISTENCE_ERROR",
            LedgerError::Cancelled => "CANCELLED",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidArgument(_) => 400,
            LedgerError::NotFound(_) => 404,
            LedgerError::Cancelled => 499,
            LedgerError::Conflict(_)
            | LedgerError::Transaction { .. }
            | LedgerError::Persistence(_) => 500,
        }
    }

    /// Safe to run the whole unit of work again.
    ///
    /// A commit rejected with a serialization failure committed nothing, so
    /// it counts as a conflict too.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Conflict(_) => true,
            LedgerError::Transaction {
                stage: TxStage::Commit,
                cause: Some(cause),
                ..
            } => matches!(**cause, LedgerError::Conflict(_)),
            _ => false,
        }
    }

    pub(crate) fn commit_failed(cause: LedgerError) -> Self {
        LedgerError::Transaction {
            stage: TxStage::Commit,
            reason: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub(crate) fn rollback_failed(rollback_error: LedgerError, original: LedgerError) -> Self {
        LedgerError::Transaction {
            stage: TxStage::Rollback,
            reason: rollback_error.to_string(),
            cause: Some(Box::new(original)),
        }
    }

    /// Classify a PostgreSQL SQLSTATE
    fn from_sqlstate(code: &str, message: &str) -> Self {
        match code {
            SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE => {
                LedgerError::Conflict(format!("{message} (SQLSTATE {code})"))
            }
            FOREIGN_KEY_VIOLATION => LedgerError::NotFound(format!("referenced account: {message}")),
            CHECK_VIOLATION => LedgerError::InvalidArgument(message.to_string()),
            _ => LedgerError::Persistence(format!("{message} (SQLSTATE {code})")),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) => match db.code() {
                Some(code) => LedgerError::from_sqlstate(&code, db.message()),
                None => LedgerError::Persistence(e.to_string()),
            },
            other => LedgerError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InvalidArgument("x".into()).code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(LedgerError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(LedgerError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            LedgerError::commit_failed(LedgerError::Persistence("io".into())).code(),
            "TRANSACTION_ERROR"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidArgument("x".into()).http_status(), 400);
        assert_eq!(LedgerError::NotFound("x".into()).http_status(), 404);
        assert_eq!(LedgerError::Conflict("x".into()).http_status(), 500);
        assert_eq!(LedgerError::Persistence("x".into()).http_status(), 500);
        assert_eq!(LedgerError::Cancelled.http_status(), 499);
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::Conflict("deadlock".into()).is_retryable());
        assert!(LedgerError::commit_failed(LedgerError::Conflict("40001".into())).is_retryable());
        assert!(!LedgerError::commit_failed(LedgerError::Persistence("io".into())).is_retryable());
        assert!(
            !LedgerError::rollback_failed(
                LedgerError::Persistence("io".into()),
                LedgerError::Conflict("40001".into())
            )
            .is_retryable()
        );
        assert!(!LedgerError::NotFound("x".into()).is_retryable());
        assert!(!LedgerError::Cancelled.is_retryable());
    }

    #[test]
    fn test_rollback_failure_keeps_original_cause() {
        let err = LedgerError::rollback_failed(
            LedgerError::Persistence("connection reset".into()),
            LedgerError::NotFound("account 7".into()),
        );
        match err {
            LedgerError::Transaction {
                stage,
                reason,
                cause: Some(cause),
            } => {
                assert_eq!(stage, TxStage::Rollback);
                assert!(reason.contains("connection reset"));
                assert!(matches!(*cause, LedgerError::NotFound(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sqlstate_classification() {
        assert!(matches!(
            LedgerError::from_sqlstate("40001", "could not serialize access"),
            LedgerError::Conflict(_)
        ));
        assert!(matches!(
            LedgerError::from_sqlstate("40P01", "deadlock detected"),
            LedgerError::Conflict(_)
        ));
        assert!(matches!(
            LedgerError::from_sqlstate("23503", "violates foreign key constraint"),
            LedgerError::NotFound(_)
        ));
        assert!(matches!(
            LedgerError::from_sqlstate("23514", "violates check constraint"),
            LedgerError::InvalidArgument(_)
        ));
        assert!(matches!(
            LedgerError::from_sqlstate("08006", "connection failure"),
            LedgerError::Persistence(_)
        ));
    }

    #[test]
    fn test_from_sqlx() {
        assert!(matches!(
            LedgerError::from(sqlx::Error::RowNotFound),
            LedgerError::NotFound(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::PoolTimedOut),
            LedgerError::Persistence(_)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(LedgerError::Cancelled.to_string(), "Operation cancelled");
        assert_eq!(
            LedgerError::commit_failed(LedgerError::Persistence("io".into())).to_string(),
            "Transaction commit failed: Persistence error: io"
        );
    }
}
