//! The ordered index handle the executors consume.
//!
//! The tree structure itself lives outside this crate's concern; what the
//! engine needs from it is a unique, ordered map from fixed-width key
//! bytes to `Rid`s with `insert_entry` / `delete_entry` / `lower_bound`.
//! Constraint violations surface as transaction aborts so callers roll
//! back atomically.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::errors::{AbortReason, StorageError, StorageResult};
use crate::transaction::Transaction;
use crate::Rid;

/// A unique ordered index over fixed-width byte keys.
#[derive(Default)]
pub struct Index {
    entries: RwLock<BTreeMap<Vec<u8>, Rid>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key -> rid`. A duplicate key aborts the calling transaction.
    pub fn insert_entry(
        &self,
        key: &[u8],
        rid: Rid,
        txn: Option<&Transaction>,
    ) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(StorageError::abort(
                txn.map_or(0, Transaction::id),
                AbortReason::IndexConflict,
            ));
        }
        entries.insert(key.to_vec(), rid);
        Ok(())
    }

    /// Removes `key`. A missing key aborts the calling transaction.
    pub fn delete_entry(&self, key: &[u8], txn: Option<&Transaction>) -> StorageResult<()> {
        if self.entries.write().remove(key).is_none() {
            return Err(StorageError::abort(
                txn.map_or(0, Transaction::id),
                AbortReason::IndexConflict,
            ));
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Option<Rid> {
        self.entries.read().get(key).copied()
    }

    /// The first entry whose key is `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> Option<(Vec<u8>, Rid)> {
        self.entries
            .read()
            .range((Bound::Included(key.to_vec()), Bound::Unbounded))
            .next()
            .map(|(k, &rid)| (k.clone(), rid))
    }

    /// All entries with `lo <= key < hi`, in key order.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Rid)> {
        self.entries
            .read()
            .range((Bound::Included(lo.to_vec()), Bound::Excluded(hi.to_vec())))
            .map(|(k, &rid)| (k.clone(), rid))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry; used when rebuilding from the heap.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
