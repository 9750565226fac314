//! The transaction manager: begin, commit, and abort with undo replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use granite::errors::StorageError;
use granite::lock::LockManager;
use granite::transaction::{Transaction, TxnState, WriteKind, WriteRecord};
use granite::TxnId;

use crate::catalog::Catalog;
use crate::errors::{EngineError, EngineResult};

/// Hands out transactions and drives their lifecycle. The transaction map
/// is engine-scoped state: built on engine start, dropped on shutdown.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    next_timestamp: AtomicU64,
    /// Serializes begin/commit/abort against each other.
    latch: Mutex<()>,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, catalog: Arc<Catalog>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            next_timestamp: AtomicU64::new(1),
            latch: Mutex::new(()),
            txn_map: RwLock::new(HashMap::new()),
            lock_manager,
            catalog,
        }
    }

    /// Starts a new transaction in its growing phase.
    pub fn begin(&self) -> Arc<Transaction> {
        let _guard = self.latch.lock();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let start_ts = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, start_ts));
        txn.set_state(TxnState::Growing);
        self.txn_map.write().insert(txn_id, Arc::clone(&txn));
        debug!("txn: began {txn_id} (ts {start_ts})");
        txn
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    /// Makes the transaction's effects final: the undo log is discarded and
    /// every lock released. Committing twice is a no-op.
    pub fn commit(&self, txn: &Transaction) -> EngineResult<()> {
        let _guard = self.latch.lock();
        match txn.state() {
            TxnState::Committed => return Ok(()),
            TxnState::Aborted => {
                return Err(EngineError::Internal(format!(
                    "cannot commit aborted transaction {}",
                    txn.id()
                )))
            }
            _ => {}
        }

        txn.take_write_set();
        self.release_locks(txn)?;
        txn.set_state(TxnState::Committed);
        debug!("txn: committed {}", txn.id());
        Ok(())
    }

    /// Rolls the transaction back by replaying its write set in reverse,
    /// then releases every lock. Aborting twice is a no-op.
    pub fn abort(&self, txn: &Transaction) -> EngineResult<()> {
        let _guard = self.latch.lock();
        match txn.state() {
            TxnState::Aborted => return Ok(()),
            TxnState::Committed => {
                return Err(EngineError::Internal(format!(
                    "cannot abort committed transaction {}",
                    txn.id()
                )))
            }
            _ => {}
        }

        let writes = txn.take_write_set();
        debug!("txn: aborting {}, undoing {} writes", txn.id(), writes.len());
        for write in writes.iter().rev() {
            self.undo(txn, write)?;
        }
        self.release_locks(txn)?;
        txn.set_state(TxnState::Aborted);
        Ok(())
    }

    fn release_locks(&self, txn: &Transaction) -> EngineResult<()> {
        for id in txn.take_lock_set() {
            self.lock_manager.unlock(txn, id)?;
        }
        Ok(())
    }

    /// Applies the inverse of one recorded mutation. The rollback runs
    /// without a lock context: every lock it could need is already held
    /// exclusively by this transaction.
    fn undo(&self, txn: &Transaction, write: &WriteRecord) -> EngineResult<()> {
        let meta = self.catalog.get_table(&write.table_name)?;
        let fh = self.catalog.file_handle(&write.table_name)?;
        match write.kind {
            WriteKind::Insert => {
                let record = fh.get(write.rid, None)?;
                for index in &meta.indexes {
                    let ih = self.catalog.index_handle(&index.name)?;
                    ih.delete_entry(&Catalog::index_key(index, &record.data), Some(txn))?;
                }
                fh.delete(write.rid, None)?;
            }
            WriteKind::Delete => {
                let before = before_image(txn, write)?;
                fh.insert_at(write.rid, &before.data)?;
                for index in &meta.indexes {
                    let ih = self.catalog.index_handle(&index.name)?;
                    ih.insert_entry(
                        &Catalog::index_key(index, &before.data),
                        write.rid,
                        Some(txn),
                    )?;
                }
            }
            WriteKind::Update => {
                let before = before_image(txn, write)?;
                let current = fh.get(write.rid, None)?;
                for index in &meta.indexes {
                    let old_key = Catalog::index_key(index, &current.data);
                    let new_key = Catalog::index_key(index, &before.data);
                    if old_key == new_key {
                        continue;
                    }
                    let ih = self.catalog.index_handle(&index.name)?;
                    ih.delete_entry(&old_key, Some(txn))?;
                    ih.insert_entry(&new_key, write.rid, Some(txn))?;
                }
                fh.update(write.rid, &before.data, None)?;
            }
        }
        Ok(())
    }
}

fn before_image<'a>(
    txn: &Transaction,
    write: &'a WriteRecord,
) -> EngineResult<&'a granite::Record> {
    write.before_image.as_ref().ok_or_else(|| {
        EngineError::Storage(StorageError::Internal(format!(
            "txn {}: {:?} write record for '{}' lacks a before image",
            txn.id(),
            write.kind,
            write.table_name
        )))
    })
}
