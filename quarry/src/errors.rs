//! Error types for the engine layer.

use granite::errors::StorageError;
use thiserror::Error;

/// Unified error type for catalog, executor and transaction operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Anything surfaced by the storage layer, including transaction
    /// aborts from the lock manager.
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("catalog serialization: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True when the error obliges the caller to roll the transaction
    /// back before doing anything else.
    pub fn is_txn_abort(&self) -> bool {
        matches!(self, EngineError::Storage(err) if err.is_txn_abort())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(StorageError::from(err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use granite::errors::AbortReason;

    #[test]
    fn storage_aborts_are_recognized_through_the_wrapper() {
        let err = EngineError::from(StorageError::abort(3, AbortReason::DeadlockPrevention));
        assert!(err.is_txn_abort());
        assert_eq!(err.to_string(), "transaction 3 aborted: deadlock prevention");

        assert!(!EngineError::TableNotFound("t".into()).is_txn_abort());
    }
}
