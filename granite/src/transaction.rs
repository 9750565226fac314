//! Per-transaction state.
//!
//! A `Transaction` carries its two-phase-locking lifecycle, the set of
//! locks it holds, and the write set replayed in reverse on rollback. The
//! transaction manager that drives begin/commit/abort lives a layer up;
//! this type is what the storage operations and the lock manager see.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::lock::{LockDataId, LockManager};
use crate::record::Record;
use crate::{Rid, Timestamp, TxnId};

/// The strict two-phase-locking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// The kind of mutation a `WriteRecord` undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Delete,
    Update,
}

/// One entry of the undo log: enough to invert a single record mutation.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub kind: WriteKind,
    pub table_name: String,
    pub rid: Rid,
    /// The tuple bytes as they were before the mutation; `None` for
    /// inserts, which are undone by deleting.
    pub before_image: Option<Record>,
}

impl WriteRecord {
    pub fn insert(table_name: impl Into<String>, rid: Rid) -> Self {
        Self {
            kind: WriteKind::Insert,
            table_name: table_name.into(),
            rid,
            before_image: None,
        }
    }

    pub fn delete(table_name: impl Into<String>, rid: Rid, before_image: Record) -> Self {
        Self {
            kind: WriteKind::Delete,
            table_name: table_name.into(),
            rid,
            before_image: Some(before_image),
        }
    }

    pub fn update(table_name: impl Into<String>, rid: Rid, before_image: Record) -> Self {
        Self {
            kind: WriteKind::Update,
            table_name: table_name.into(),
            rid,
            before_image: Some(before_image),
        }
    }
}

/// A single transaction. Shared by reference between the session, the lock
/// manager and the executors, so its state is interior-mutable.
pub struct Transaction {
    txn_id: TxnId,
    start_ts: Timestamp,
    state: Mutex<TxnState>,
    lock_set: Mutex<HashSet<LockDataId>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId, start_ts: Timestamp) -> Self {
        Self {
            txn_id,
            start_ts,
            state: Mutex::new(TxnState::Default),
            lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    pub fn add_lock(&self, id: LockDataId) {
        self.lock_set.lock().insert(id);
    }

    pub fn remove_lock(&self, id: &LockDataId) {
        self.lock_set.lock().remove(id);
    }

    pub fn holds_lock(&self, id: &LockDataId) -> bool {
        self.lock_set.lock().contains(id)
    }

    pub fn lock_set_len(&self) -> usize {
        self.lock_set.lock().len()
    }

    /// Drains the lock set, handing ownership of the ids to the caller.
    pub fn take_lock_set(&self) -> HashSet<LockDataId> {
        std::mem::take(&mut *self.lock_set.lock())
    }

    pub fn append_write(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().len()
    }

    /// Drains the write set in insertion order.
    pub fn take_write_set(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut *self.write_set.lock())
    }
}

/// The handle threaded through every record operation: who is asking, and
/// which lock manager arbitrates.
pub struct TxnContext<'a> {
    pub lock_manager: &'a LockManager,
    pub txn: &'a Transaction,
}
