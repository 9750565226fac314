//! Manages locks on database resources.
//!
//! Hierarchical multi-granularity locking over tables and records with
//! strict two-phase locking. The manager never waits: a conflicting
//! request aborts the requester immediately (deadlock prevention), so no
//! call can block on another transaction.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::errors::{AbortReason, StorageError, StorageResult};
use crate::transaction::{Transaction, TxnState};
use crate::{FileId, Rid, TxnId};

/// The modes a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// The aggregate compatibility label of a request queue: the lattice join
/// of its granted modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupLockMode {
    #[default]
    NonLock,
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// A lockable resource: a whole table or one record in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDataId {
    Table(FileId),
    Record(FileId, Rid),
}

impl LockDataId {
    pub fn file_id(&self) -> FileId {
        match self {
            LockDataId::Table(file_id) => *file_id,
            LockDataId::Record(file_id, _) => *file_id,
        }
    }
}

/// A request for a lock by a transaction.
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Granted-request counters per mode, for constant-time upgrade checks.
#[derive(Debug, Default, Clone, Copy)]
struct ModeCounts {
    intention_shared: u32,
    intention_exclusive: u32,
    shared: u32,
    shared_intention_exclusive: u32,
    exclusive: u32,
}

impl ModeCounts {
    fn slot(&mut self, mode: LockMode) -> &mut u32 {
        match mode {
            LockMode::IntentionShared => &mut self.intention_shared,
            LockMode::IntentionExclusive => &mut self.intention_exclusive,
            LockMode::Shared => &mut self.shared,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive,
            LockMode::Exclusive => &mut self.exclusive,
        }
    }

    fn inc(&mut self, mode: LockMode) {
        *self.slot(mode) += 1;
    }

    fn dec(&mut self, mode: LockMode) {
        let slot = self.slot(mode);
        debug_assert!(*slot > 0, "mode counter underflow");
        *slot = slot.saturating_sub(1);
    }
}

/// A queue of lock requests for one resource.
#[derive(Debug, Default)]
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    group_mode: GroupLockMode,
    counts: ModeCounts,
}

impl LockRequestQueue {
    /// The position of this transaction's granted request, if any. Every
    /// queued request is granted here: a request that cannot be granted
    /// immediately aborts its transaction instead of waiting.
    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.requests
            .iter()
            .position(|r| r.txn_id == txn_id && r.granted)
    }

    fn grant(&mut self, txn_id: TxnId, mode: LockMode) {
        self.requests.push_back(LockRequest {
            txn_id,
            mode,
            granted: true,
        });
        self.counts.inc(mode);
        self.recompute_group_mode();
    }

    /// Swaps the mode of the request at `idx` and fixes the counters.
    fn upgrade(&mut self, idx: usize, to: LockMode) {
        let from = self.requests[idx].mode;
        self.requests[idx].mode = to;
        self.counts.dec(from);
        self.counts.inc(to);
        self.recompute_group_mode();
    }

    /// The lattice join of the granted modes. S and IX are never granted
    /// together (they conflict), so the counters order totally.
    fn recompute_group_mode(&mut self) {
        let c = &self.counts;
        self.group_mode = if c.exclusive > 0 {
            GroupLockMode::Exclusive
        } else if c.shared_intention_exclusive > 0 {
            GroupLockMode::SharedIntentionExclusive
        } else if c.intention_exclusive > 0 {
            GroupLockMode::IntentionExclusive
        } else if c.shared > 0 {
            GroupLockMode::Shared
        } else if c.intention_shared > 0 {
            GroupLockMode::IntentionShared
        } else {
            GroupLockMode::NonLock
        };
    }
}

/// Whether a new request of `mode` is compatible with a queue whose granted
/// requests aggregate to `group`, per the multi-granularity matrix.
fn compatible(mode: LockMode, group: GroupLockMode) -> bool {
    use GroupLockMode as G;
    use LockMode as M;
    match mode {
        M::IntentionShared => group != G::Exclusive,
        M::IntentionExclusive => !matches!(
            group,
            G::Shared | G::SharedIntentionExclusive | G::Exclusive
        ),
        M::Shared => !matches!(
            group,
            G::IntentionExclusive | G::SharedIntentionExclusive | G::Exclusive
        ),
        M::SharedIntentionExclusive => matches!(group, G::NonLock | G::IntentionShared),
        M::Exclusive => group == G::NonLock,
    }
}

/// Checks the lifecycle before any acquisition: terminal and shrinking
/// transactions may not lock; a fresh transaction enters its growing phase.
fn ensure_txn_can_lock(txn: &Transaction) -> StorageResult<()> {
    match txn.state() {
        TxnState::Committed | TxnState::Aborted | TxnState::Shrinking => Err(
            StorageError::abort(txn.id(), AbortReason::LockOnShrinking),
        ),
        TxnState::Default => {
            txn.set_state(TxnState::Growing);
            Ok(())
        }
        TxnState::Growing => Ok(()),
    }
}

type LockTable = HashMap<LockDataId, LockRequestQueue>;

/// The main lock manager struct.
#[derive(Default)]
pub struct LockManager {
    /// One latch protects the whole table; queue operations are short.
    latch: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared lock on one record. Takes table IS first.
    pub fn lock_shared_on_record(
        &self,
        txn: &Transaction,
        rid: Rid,
        file_id: FileId,
    ) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;
        self.lock_is_on_table_locked(&mut table, txn, file_id)?;

        let id = LockDataId::Record(file_id, rid);
        let queue = table.entry(id).or_default();
        if queue.position_of(txn.id()).is_some() {
            // S is the weakest record lock; whatever is held covers it.
            return Ok(());
        }
        if !compatible(LockMode::Shared, queue.group_mode) {
            debug!(
                "lock: txn {} aborted, S on {id:?} vs group {:?}",
                txn.id(),
                queue.group_mode
            );
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::Shared);
        txn.add_lock(id);
        trace!("lock: txn {} granted S on {id:?}", txn.id());
        Ok(())
    }

    /// Exclusive lock on one record. Takes table IX first.
    pub fn lock_exclusive_on_record(
        &self,
        txn: &Transaction,
        rid: Rid,
        file_id: FileId,
    ) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;
        self.lock_ix_on_table_locked(&mut table, txn, file_id)?;

        let id = LockDataId::Record(file_id, rid);
        let queue = table.entry(id).or_default();
        if let Some(idx) = queue.position_of(txn.id()) {
            return match queue.requests[idx].mode {
                LockMode::Exclusive => Ok(()),
                // S -> X only as the sole request in the queue.
                LockMode::Shared if queue.requests.len() == 1 => {
                    queue.upgrade(idx, LockMode::Exclusive);
                    trace!("lock: txn {} upgraded S->X on {id:?}", txn.id());
                    Ok(())
                }
                _ => Err(StorageError::abort(
                    txn.id(),
                    AbortReason::UpgradeConflict,
                )),
            };
        }
        if !compatible(LockMode::Exclusive, queue.group_mode) {
            debug!(
                "lock: txn {} aborted, X on {id:?} vs group {:?}",
                txn.id(),
                queue.group_mode
            );
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::Exclusive);
        txn.add_lock(id);
        trace!("lock: txn {} granted X on {id:?}", txn.id());
        Ok(())
    }

    /// Shared lock on a whole table.
    pub fn lock_shared_on_table(&self, txn: &Transaction, file_id: FileId) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;

        let id = LockDataId::Table(file_id);
        let queue = table.entry(id).or_default();
        if let Some(idx) = queue.position_of(txn.id()) {
            return match queue.requests[idx].mode {
                LockMode::Shared
                | LockMode::SharedIntentionExclusive
                | LockMode::Exclusive => Ok(()),
                LockMode::IntentionExclusive if queue.counts.intention_exclusive == 1 => {
                    queue.upgrade(idx, LockMode::SharedIntentionExclusive);
                    Ok(())
                }
                LockMode::IntentionShared
                    if queue.counts.intention_exclusive == 0
                        && queue.counts.shared_intention_exclusive == 0 =>
                {
                    queue.upgrade(idx, LockMode::Shared);
                    Ok(())
                }
                _ => Err(StorageError::abort(
                    txn.id(),
                    AbortReason::DeadlockPrevention,
                )),
            };
        }
        if !compatible(LockMode::Shared, queue.group_mode) {
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::Shared);
        txn.add_lock(id);
        Ok(())
    }

    /// Exclusive lock on a whole table.
    pub fn lock_exclusive_on_table(&self, txn: &Transaction, file_id: FileId) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;

        let id = LockDataId::Table(file_id);
        let queue = table.entry(id).or_default();
        if let Some(idx) = queue.position_of(txn.id()) {
            if queue.requests[idx].mode == LockMode::Exclusive {
                return Ok(());
            }
            // Any mode upgrades to X only when the queue would otherwise
            // be empty.
            if queue.requests.len() == 1 {
                queue.upgrade(idx, LockMode::Exclusive);
                return Ok(());
            }
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        if !compatible(LockMode::Exclusive, queue.group_mode) {
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::Exclusive);
        txn.add_lock(id);
        Ok(())
    }

    /// Intention-shared lock on a table.
    pub fn lock_is_on_table(&self, txn: &Transaction, file_id: FileId) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;
        self.lock_is_on_table_locked(&mut table, txn, file_id)
    }

    /// Intention-exclusive lock on a table.
    pub fn lock_ix_on_table(&self, txn: &Transaction, file_id: FileId) -> StorageResult<()> {
        let mut table = self.latch.lock();
        ensure_txn_can_lock(txn)?;
        self.lock_ix_on_table_locked(&mut table, txn, file_id)
    }

    /// IS acquisition with the latch already held. Record-lock entry points
    /// call this for the ancestor table; `table` being `&mut` out of the
    /// latch guard is what proves the latch is held.
    fn lock_is_on_table_locked(
        &self,
        table: &mut LockTable,
        txn: &Transaction,
        file_id: FileId,
    ) -> StorageResult<()> {
        let id = LockDataId::Table(file_id);
        let queue = table.entry(id).or_default();
        if queue.position_of(txn.id()).is_some() {
            // IS is the weakest table lock; whatever is held covers it.
            return Ok(());
        }
        if !compatible(LockMode::IntentionShared, queue.group_mode) {
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::IntentionShared);
        txn.add_lock(id);
        Ok(())
    }

    /// IX acquisition with the latch already held.
    fn lock_ix_on_table_locked(
        &self,
        table: &mut LockTable,
        txn: &Transaction,
        file_id: FileId,
    ) -> StorageResult<()> {
        let id = LockDataId::Table(file_id);
        let queue = table.entry(id).or_default();
        if let Some(idx) = queue.position_of(txn.id()) {
            return match queue.requests[idx].mode {
                LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
                | LockMode::Exclusive => Ok(()),
                // S -> SIX: our S must be the only one, with no IX/SIX
                // beside it.
                LockMode::Shared
                    if queue.counts.shared == 1
                        && queue.counts.intention_exclusive == 0
                        && queue.counts.shared_intention_exclusive == 0 =>
                {
                    queue.upgrade(idx, LockMode::SharedIntentionExclusive);
                    Ok(())
                }
                LockMode::IntentionShared
                    if queue.counts.shared == 0
                        && queue.counts.shared_intention_exclusive == 0 =>
                {
                    queue.upgrade(idx, LockMode::IntentionExclusive);
                    Ok(())
                }
                _ => Err(StorageError::abort(
                    txn.id(),
                    AbortReason::DeadlockPrevention,
                )),
            };
        }
        if !compatible(LockMode::IntentionExclusive, queue.group_mode) {
            return Err(StorageError::abort(
                txn.id(),
                AbortReason::DeadlockPrevention,
            ));
        }
        queue.grant(txn.id(), LockMode::IntentionExclusive);
        txn.add_lock(id);
        Ok(())
    }

    /// Releases one lock. The first release moves the transaction into its
    /// shrinking phase; from then on acquisition is refused.
    pub fn unlock(&self, txn: &Transaction, id: LockDataId) -> StorageResult<()> {
        let mut table = self.latch.lock();

        match txn.state() {
            TxnState::Committed | TxnState::Aborted => return Ok(()),
            TxnState::Growing => txn.set_state(TxnState::Shrinking),
            _ => {}
        }

        let Some(queue) = table.get_mut(&id) else {
            return Ok(());
        };
        let removed = match queue.position_of(txn.id()) {
            Some(idx) => queue.requests.remove(idx),
            None => None,
        };
        if let Some(request) = removed {
            queue.counts.dec(request.mode);
            txn.remove_lock(&id);
            trace!(
                "lock: txn {} released {:?} on {id:?}",
                txn.id(),
                request.mode
            );
        }
        if queue.requests.is_empty() {
            table.remove(&id);
        } else {
            queue.recompute_group_mode();
        }
        Ok(())
    }

    /// The current group mode of a queue; `NonLock` when no queue exists.
    pub fn group_mode(&self, id: &LockDataId) -> GroupLockMode {
        self.latch
            .lock()
            .get(id)
            .map(|q| q.group_mode)
            .unwrap_or_default()
    }

    /// The number of requests queued on a resource.
    pub fn request_count(&self, id: &LockDataId) -> usize {
        self.latch
            .lock()
            .get(id)
            .map(|q| q.requests.len())
            .unwrap_or(0)
    }
}
