//! # Quarry
//! A small relational engine over the granite storage crate: catalog,
//! typed values, a pull-based executor tree, and transactions with
//! strict two-phase locking and undo-replay rollback.

/// Table metadata and open file/index handles.
pub mod catalog;
/// The engine error taxonomy.
pub mod errors;
/// The pull-based operator tree.
pub mod executor;
/// The transaction manager.
pub mod txn;
/// Typed values and comparisons.
pub mod value;

use std::path::Path;
use std::sync::Arc;

use granite::lock::LockManager;
use granite::pager::Pager;
use granite::transaction::{Transaction, TxnContext};
use granite::BufferPoolManager;

use crate::catalog::Catalog;
use crate::errors::EngineResult;
use crate::txn::TransactionManager;

/// What a statement needs to touch storage on a transaction's behalf.
#[derive(Clone)]
pub struct Context {
    pub lock_manager: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl Context {
    pub fn new(lock_manager: Arc<LockManager>, txn: Arc<Transaction>) -> Self {
        Self { lock_manager, txn }
    }

    /// The borrowed form the storage layer takes.
    pub fn txn_ctx(&self) -> TxnContext<'_> {
        TxnContext {
            lock_manager: &self.lock_manager,
            txn: &self.txn,
        }
    }
}

/// Wires the subsystems together over one data directory. Executor trees
/// are built directly against the catalog and a per-transaction `Context`;
/// the engine exposes the transaction API around them.
pub struct Engine {
    bpm: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    txn_manager: TransactionManager,
}

impl Engine {
    pub fn open<P: AsRef<Path>>(dir: P) -> EngineResult<Self> {
        let bpm = Arc::new(BufferPoolManager::new(Pager::new()));
        let lock_manager = Arc::new(LockManager::new());
        let catalog = Arc::new(Catalog::open(dir, Arc::clone(&bpm))?);
        let txn_manager =
            TransactionManager::new(Arc::clone(&lock_manager), Arc::clone(&catalog));
        Ok(Self {
            bpm,
            lock_manager,
            catalog,
            txn_manager,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.txn_manager.begin()
    }

    pub fn commit(&self, txn: &Transaction) -> EngineResult<()> {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Transaction) -> EngineResult<()> {
        self.txn_manager.abort(txn)
    }

    /// A statement context for `txn`.
    pub fn context(&self, txn: &Arc<Transaction>) -> Context {
        Context::new(Arc::clone(&self.lock_manager), Arc::clone(txn))
    }

    /// Writes every cached dirty page back to disk.
    pub fn flush(&self) -> EngineResult<()> {
        self.bpm.flush_all_pages()?;
        Ok(())
    }
}
