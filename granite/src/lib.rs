//! # Granite Storage Engine
//! The storage engine for the Quarry database.
//! This crate owns the on-disk and in-memory representation of records:
//! slotted heap pages behind a buffer pool, plus the lock manager and
//! transaction state that serialize access to them.

/// Occupancy bitmap helpers for slotted pages.
pub mod bitmap;
/// The buffer pool manager.
pub mod buffer_pool;
/// The storage error taxonomy.
pub mod errors;
/// The ordered index handle consumed by the executors.
pub mod index;
/// The multi-granularity lock manager.
pub mod lock;
/// The page layout and data structures.
pub mod page;
/// The pager for reading and writing pages to disk.
pub mod pager;
/// Slotted record files addressed by `Rid`.
pub mod record;
/// The forward scan over a record file.
pub mod scan;
/// Per-transaction state: lifecycle, lock set and write set.
pub mod transaction;

use std::fmt;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A unique identifier for an open record file.
pub type FileId = u32;

/// A page number within one file. The first page is page 0.
pub type PageNo = i32;

/// A slot number within one page.
pub type SlotNo = i32;

/// A unique identifier for a transaction.
pub type TxnId = u32;

/// A monotonic start timestamp handed out by the transaction manager.
pub type Timestamp = u64;

/// Sentinel page number: "no such page" / end of a free-page chain.
pub const NO_PAGE: PageNo = -1;

/// The first page that holds records; page 0 of every record file is its
/// file header.
pub const FIRST_RECORD_PAGE: PageNo = 1;

/// A page address across all open files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub file_id: FileId,
    pub page_no: PageNo,
}

/// A record identifier: one fixed-size slot in a heap file. Stable for the
/// record's whole lifetime; updates never move a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: PageNo,
    pub slot_no: SlotNo,
}

/// The sentinel `Rid` reported by operators that do not scan a file.
pub const INVALID_RID: Rid = Rid {
    page_no: NO_PAGE,
    slot_no: -1,
};

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

pub use buffer_pool::{BufferPoolManager, PageGuard};
pub use page::Page;
pub use record::{Record, RecordFile};
pub use scan::RecordScan;
pub use transaction::{Transaction, TxnContext};
