//! Error types for the storage layer.
//!
//! Structural storage errors (`PageNotExist`, `RecordNotFound`) propagate
//! unchanged to the caller. `TxnAbort` is the only way a well-formed caller
//! of the lock manager can fail; it must be handled at the transaction
//! boundary by rolling back.

use crate::{PageNo, Rid, TxnId};
use std::fmt;
use thiserror::Error;

/// Why a transaction was told to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested after the transaction started releasing locks.
    LockOnShrinking,
    /// The requested lock conflicts with locks held by other transactions;
    /// the requester is aborted instead of waiting.
    DeadlockPrevention,
    /// A lock upgrade is not possible given the other requests in the queue.
    UpgradeConflict,
    /// An index constraint was violated (duplicate key, missing key).
    IndexConflict,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::DeadlockPrevention => "deadlock prevention",
            AbortReason::UpgradeConflict => "lock upgrade conflict",
            AbortReason::IndexConflict => "index constraint violation",
        };
        f.write_str(msg)
    }
}

/// Unified error type for all storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The addressed page is outside the file.
    #[error("page {0} does not exist")]
    PageNotExist(PageNo),

    /// The addressed slot holds no record.
    #[error("no record at rid {0}")]
    RecordNotFound(Rid),

    /// The transaction must roll back.
    #[error("transaction {txn_id} aborted: {reason}")]
    TxnAbort { txn_id: TxnId, reason: AbortReason },

    /// A broken invariant the storage layer cannot recover from.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn abort(txn_id: TxnId, reason: AbortReason) -> Self {
        StorageError::TxnAbort { txn_id, reason }
    }

    /// True when the error obliges the caller to abort the transaction.
    pub fn is_txn_abort(&self) -> bool {
        matches!(self, StorageError::TxnAbort { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rid;

    #[test]
    fn abort_errors_render_their_reason() {
        let err = StorageError::abort(7, AbortReason::DeadlockPrevention);
        assert_eq!(err.to_string(), "transaction 7 aborted: deadlock prevention");
        assert!(err.is_txn_abort());
    }

    #[test]
    fn structural_errors_are_not_aborts() {
        let err = StorageError::RecordNotFound(Rid {
            page_no: 1,
            slot_no: 3,
        });
        assert_eq!(err.to_string(), "no record at rid (1, 3)");
        assert!(!err.is_txn_abort());
    }
}
