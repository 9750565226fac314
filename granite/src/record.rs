//! Slotted-page heap files addressed by `Rid`.
//!
//! Page 0 of every record file holds the `FileHeader`. Every later page is
//! `PageHeader | bitmap | slot array` with uniform fixed-width slots; the
//! bitmap has exactly `num_records` bits set. Pages with at least one free
//! slot form a singly linked chain rooted at `first_free_page_no`.

use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::bitmap;
use crate::buffer_pool::{BufferPoolManager, PageGuard};
use crate::errors::{StorageError, StorageResult};
use crate::page::Page;
use crate::scan::RecordScan;
use crate::transaction::TxnContext;
use crate::{FileId, PageId, PageNo, Rid, SlotNo, FIRST_RECORD_PAGE, NO_PAGE, PAGE_SIZE};

/// Size of the packed `FileHeader` on page 0.
pub const FILE_HEADER_SIZE: usize = 20;
/// Size of the packed `PageHeader` at the start of every data page.
pub const PAGE_HEADER_SIZE: usize = 8;

/// File-wide geometry and free-list root, persisted on page 0.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub record_size: u32,
    pub num_records_per_page: u32,
    pub bitmap_size: u32,
    pub num_pages: u32,
    pub first_free_page_no: PageNo,
}

impl FileHeader {
    /// Computes the geometry for `record_size`: the largest slot count
    /// whose header + bitmap + slots still fit one page.
    fn new(record_size: usize) -> StorageResult<Self> {
        if record_size == 0 {
            return Err(StorageError::Internal("record size must be non-zero".into()));
        }
        let avail_bits = (PAGE_SIZE - PAGE_HEADER_SIZE) * 8;
        let mut slots = avail_bits / (record_size * 8 + 1);
        while slots > 0
            && PAGE_HEADER_SIZE + slots.div_ceil(8) + slots * record_size > PAGE_SIZE
        {
            slots -= 1;
        }
        if slots == 0 {
            return Err(StorageError::Internal(format!(
                "record size {record_size} does not fit a {PAGE_SIZE}-byte page"
            )));
        }
        Ok(Self {
            record_size: record_size as u32,
            num_records_per_page: slots as u32,
            bitmap_size: slots.div_ceil(8) as u32,
            num_pages: 1,
            first_free_page_no: NO_PAGE,
        })
    }

    fn read_from(page: &Page) -> Self {
        Self {
            record_size: page.read_u32(0),
            num_records_per_page: page.read_u32(4),
            bitmap_size: page.read_u32(8),
            num_pages: page.read_u32(12),
            first_free_page_no: page.read_i32(16),
        }
    }

    fn write_to(&self, page: &mut Page) {
        page.write_u32(0, self.record_size);
        page.write_u32(4, self.num_records_per_page);
        page.write_u32(8, self.bitmap_size);
        page.write_u32(12, self.num_pages);
        page.write_i32(16, self.first_free_page_no);
    }
}

/// Per-page record count and free-chain link.
#[derive(Debug, Clone, Copy)]
struct PageHeader {
    num_records: u32,
    next_free_page_no: PageNo,
}

impl PageHeader {
    fn read_from(page: &Page) -> Self {
        Self {
            num_records: page.read_u32(0),
            next_free_page_no: page.read_i32(4),
        }
    }

    fn write_to(&self, page: &mut Page) {
        page.write_u32(0, self.num_records);
        page.write_i32(4, self.next_free_page_no);
    }
}

/// An opaque fixed-length tuple, copied out of its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub data: Vec<u8>,
}

impl Record {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// An open slotted heap file.
pub struct RecordFile {
    file_id: FileId,
    bpm: Arc<BufferPoolManager>,
    /// Guards the free-list root and page count; page contents are
    /// serialized by the buffer pool's per-frame latches plus record locks.
    header: Mutex<FileHeader>,
}

fn bitmap_range(hdr: &FileHeader) -> std::ops::Range<usize> {
    PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + hdr.bitmap_size as usize
}

fn slot_range(hdr: &FileHeader, slot_no: SlotNo) -> std::ops::Range<usize> {
    let start = PAGE_HEADER_SIZE
        + hdr.bitmap_size as usize
        + slot_no as usize * hdr.record_size as usize;
    start..start + hdr.record_size as usize
}

impl RecordFile {
    /// Creates a fresh record file at `path` with the given slot width.
    pub fn create<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        path: P,
        record_size: usize,
    ) -> StorageResult<Self> {
        let header = FileHeader::new(record_size)?;
        let file_id = bpm.pager.lock().open_file(path)?;
        {
            let guard = bpm.new_page(file_id)?;
            if guard.page_id().page_no != 0 {
                return Err(StorageError::Internal(format!(
                    "record file {file_id} is not empty"
                )));
            }
            header.write_to(&mut guard.write());
        }
        debug!(
            "record: created file {file_id} ({} slots per page)",
            header.num_records_per_page
        );
        Ok(Self {
            file_id,
            bpm,
            header: Mutex::new(header),
        })
    }

    /// Opens an existing record file and reads its header from page 0.
    pub fn open<P: AsRef<Path>>(bpm: Arc<BufferPoolManager>, path: P) -> StorageResult<Self> {
        let file_id = bpm.pager.lock().open_file(path)?;
        let header = {
            let guard = bpm.fetch_page(PageId {
                file_id,
                page_no: 0,
            })?;
            let header = FileHeader::read_from(&guard.read());
            header
        };
        if header.record_size == 0 || header.num_records_per_page == 0 {
            return Err(StorageError::Internal(format!(
                "file {file_id} has a corrupted header"
            )));
        }
        Ok(Self {
            file_id,
            bpm,
            header: Mutex::new(header),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn record_size(&self) -> usize {
        self.header.lock().record_size as usize
    }

    pub fn num_pages(&self) -> PageNo {
        self.header.lock().num_pages as PageNo
    }

    pub fn slots_per_page(&self) -> usize {
        self.header.lock().num_records_per_page as usize
    }

    pub(crate) fn header_snapshot(&self) -> FileHeader {
        *self.header.lock()
    }

    /// A fresh forward scan over the occupied slots.
    pub fn scan(self: &Arc<Self>) -> StorageResult<RecordScan> {
        RecordScan::new(Arc::clone(self))
    }

    /// Reads the record at `rid`, taking a shared record lock when a
    /// transaction context is supplied.
    pub fn get(&self, rid: Rid, ctx: Option<&TxnContext<'_>>) -> StorageResult<Record> {
        if let Some(ctx) = ctx {
            ctx.lock_manager
                .lock_shared_on_record(ctx.txn, rid, self.file_id)?;
        }
        let hdr = self.header_snapshot();
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        let page = guard.read();
        self.check_slot(&hdr, &page, rid)?;
        Ok(Record {
            data: page.data[slot_range(&hdr, rid.slot_no)].to_vec(),
        })
    }

    /// Inserts `buf` into the first free slot, growing the file when the
    /// free chain is empty. Takes an exclusive record lock on the chosen
    /// slot before mutating it.
    pub fn insert(&self, buf: &[u8], ctx: Option<&TxnContext<'_>>) -> StorageResult<Rid> {
        let mut hdr = self.header.lock();
        self.check_buf(&hdr, buf)?;

        // Walk to a chain head with a free slot. A page that filled up
        // through `insert_at` can still sit in the chain; it is unlinked
        // here rather than handed out.
        let (page_no, slot_no) = loop {
            if hdr.first_free_page_no == NO_PAGE {
                break (self.create_page(&mut hdr)?, 0);
            }
            let page_no = hdr.first_free_page_no;
            let guard = self.fetch_record_page(&hdr, page_no)?;
            let page = guard.read();
            match bitmap::first_unset(
                &page.data[bitmap_range(&hdr)],
                hdr.num_records_per_page as usize,
            ) {
                Some(slot) => break (page_no, slot as SlotNo),
                None => {
                    hdr.first_free_page_no = PageHeader::read_from(&page).next_free_page_no;
                    drop(page);
                    drop(guard);
                    self.flush_header(&hdr)?;
                }
            }
        };
        let rid = Rid { page_no, slot_no };
        let guard = self.bpm.fetch_page(PageId {
            file_id: self.file_id,
            page_no,
        })?;

        if let Some(ctx) = ctx {
            ctx.lock_manager
                .lock_exclusive_on_record(ctx.txn, rid, self.file_id)?;
        }

        let mut page = guard.write();
        let mut page_hdr = PageHeader::read_from(&page);
        bitmap::set(&mut page.data[bitmap_range(&hdr)], slot_no as usize);
        page.data[slot_range(&hdr, slot_no)].copy_from_slice(buf);
        page_hdr.num_records += 1;
        if page_hdr.num_records == hdr.num_records_per_page {
            // The page just filled up; the chain moves on.
            hdr.first_free_page_no = page_hdr.next_free_page_no;
            page_hdr.next_free_page_no = NO_PAGE;
            self.flush_header(&hdr)?;
        }
        page_hdr.write_to(&mut page);
        Ok(rid)
    }

    /// Re-inserts a record at the exact `rid` it occupied before a delete.
    /// Used by rollback; the slot must be free.
    pub fn insert_at(&self, rid: Rid, buf: &[u8]) -> StorageResult<()> {
        let mut hdr = self.header.lock();
        self.check_buf(&hdr, buf)?;
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        let mut page = guard.write();
        if rid.slot_no < 0 || rid.slot_no as u32 >= hdr.num_records_per_page {
            return Err(StorageError::RecordNotFound(rid));
        }
        if bitmap::test(&page.data[bitmap_range(&hdr)], rid.slot_no as usize) {
            return Err(StorageError::Internal(format!(
                "slot at rid {rid} is already occupied"
            )));
        }

        let mut page_hdr = PageHeader::read_from(&page);
        bitmap::set(&mut page.data[bitmap_range(&hdr)], rid.slot_no as usize);
        page.data[slot_range(&hdr, rid.slot_no)].copy_from_slice(buf);
        page_hdr.num_records += 1;
        if page_hdr.num_records == hdr.num_records_per_page
            && hdr.first_free_page_no == rid.page_no
        {
            // Filled the head of the free chain; advance it.
            hdr.first_free_page_no = page_hdr.next_free_page_no;
            page_hdr.next_free_page_no = NO_PAGE;
            self.flush_header(&hdr)?;
        }
        page_hdr.write_to(&mut page);
        Ok(())
    }

    /// Deletes the record at `rid` under an exclusive record lock. A page
    /// leaving the full state rejoins the head of the free chain.
    pub fn delete(&self, rid: Rid, ctx: Option<&TxnContext<'_>>) -> StorageResult<()> {
        if let Some(ctx) = ctx {
            ctx.lock_manager
                .lock_exclusive_on_record(ctx.txn, rid, self.file_id)?;
        }
        let mut hdr = self.header.lock();
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        let mut page = guard.write();
        self.check_slot(&hdr, &page, rid)?;

        let mut page_hdr = PageHeader::read_from(&page);
        let was_full = page_hdr.num_records == hdr.num_records_per_page;
        bitmap::reset(&mut page.data[bitmap_range(&hdr)], rid.slot_no as usize);
        page_hdr.num_records -= 1;
        if was_full {
            page_hdr.next_free_page_no = hdr.first_free_page_no;
            hdr.first_free_page_no = rid.page_no;
            self.flush_header(&hdr)?;
        }
        page_hdr.write_to(&mut page);
        Ok(())
    }

    /// Overwrites the record at `rid` in place under an exclusive record
    /// lock. Slots are fixed-width, so the `Rid` never changes.
    pub fn update(&self, rid: Rid, buf: &[u8], ctx: Option<&TxnContext<'_>>) -> StorageResult<()> {
        if let Some(ctx) = ctx {
            ctx.lock_manager
                .lock_exclusive_on_record(ctx.txn, rid, self.file_id)?;
        }
        let hdr = self.header_snapshot();
        self.check_buf(&hdr, buf)?;
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        let mut page = guard.write();
        self.check_slot(&hdr, &page, rid)?;
        page.data[slot_range(&hdr, rid.slot_no)].copy_from_slice(buf);
        Ok(())
    }

    /// The first occupied slot of `page_no` strictly after `after`.
    pub(crate) fn next_set_slot(
        &self,
        page_no: PageNo,
        after: SlotNo,
    ) -> StorageResult<Option<SlotNo>> {
        let hdr = self.header_snapshot();
        let guard = self.fetch_record_page(&hdr, page_no)?;
        let page = guard.read();
        Ok(bitmap::next_set(
            &page.data[bitmap_range(&hdr)],
            hdr.num_records_per_page as usize,
            after,
        )
        .map(|slot| slot as SlotNo))
    }

    /// Occupied-slot count of one page, for invariant checks.
    pub fn page_record_count(&self, page_no: PageNo) -> StorageResult<(u32, usize)> {
        let hdr = self.header_snapshot();
        let guard = self.fetch_record_page(&hdr, page_no)?;
        let page = guard.read();
        let page_hdr = PageHeader::read_from(&page);
        let populated = bitmap::count_set(
            &page.data[bitmap_range(&hdr)],
            hdr.num_records_per_page as usize,
        );
        Ok((page_hdr.num_records, populated))
    }

    /// Pins a record page, rejecting addresses outside the file.
    fn fetch_record_page(
        &self,
        hdr: &FileHeader,
        page_no: PageNo,
    ) -> StorageResult<PageGuard<'_>> {
        if page_no < FIRST_RECORD_PAGE || page_no as u32 >= hdr.num_pages {
            return Err(StorageError::PageNotExist(page_no));
        }
        self.bpm.fetch_page(PageId {
            file_id: self.file_id,
            page_no,
        })
    }

    /// Allocates and initializes a fresh record page, linking it as the
    /// new head of the free chain. Only called when the chain is empty, so
    /// the old head can never be orphaned.
    fn create_page(&self, hdr: &mut FileHeader) -> StorageResult<PageNo> {
        let guard = self.bpm.new_page(self.file_id)?;
        let page_no = guard.page_id().page_no;
        {
            let mut page = guard.write();
            PageHeader {
                num_records: 0,
                next_free_page_no: NO_PAGE,
            }
            .write_to(&mut page);
            // A new page arrives zeroed, so the bitmap is already clear.
        }
        hdr.num_pages = page_no as u32 + 1;
        hdr.first_free_page_no = page_no;
        self.flush_header(hdr)?;
        debug!("record: file {} grew to page {page_no}", self.file_id);
        Ok(page_no)
    }

    /// Write-through of the file header to page 0.
    fn flush_header(&self, hdr: &FileHeader) -> StorageResult<()> {
        let guard = self.bpm.fetch_page(PageId {
            file_id: self.file_id,
            page_no: 0,
        })?;
        hdr.write_to(&mut guard.write());
        Ok(())
    }

    fn check_buf(&self, hdr: &FileHeader, buf: &[u8]) -> StorageResult<()> {
        if buf.len() != hdr.record_size as usize {
            return Err(StorageError::Internal(format!(
                "record buffer is {} bytes, file {} expects {}",
                buf.len(),
                self.file_id,
                hdr.record_size
            )));
        }
        Ok(())
    }

    fn check_slot(&self, hdr: &FileHeader, page: &Page, rid: Rid) -> StorageResult<()> {
        if rid.slot_no < 0
            || rid.slot_no as u32 >= hdr.num_records_per_page
            || !bitmap::test(&page.data[bitmap_range(&hdr)], rid.slot_no as usize)
        {
            return Err(StorageError::RecordNotFound(rid));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use tempfile::tempdir;

    fn open_file(dir: &std::path::Path, record_size: usize) -> Arc<RecordFile> {
        let bpm = Arc::new(BufferPoolManager::new(Pager::new()));
        Arc::new(RecordFile::create(bpm, dir.join("t.tbl"), record_size).unwrap())
    }

    #[test]
    fn geometry_fits_the_page() {
        for record_size in [1, 7, 16, 100, PAGE_SIZE - PAGE_HEADER_SIZE - 1] {
            let hdr = FileHeader::new(record_size).unwrap();
            let slots = hdr.num_records_per_page as usize;
            assert!(slots >= 1, "record_size {record_size} yields zero slots");
            assert!(
                PAGE_HEADER_SIZE + hdr.bitmap_size as usize + slots * record_size <= PAGE_SIZE
            );
            // One more slot would no longer fit.
            assert!(
                PAGE_HEADER_SIZE + (slots + 1).div_ceil(8) + (slots + 1) * record_size
                    > PAGE_SIZE
            );
        }
        assert!(FileHeader::new(0).is_err());
        assert!(FileHeader::new(PAGE_SIZE).is_err());
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 8);

        let rid = file.insert(b"abcdefgh", None).unwrap();
        assert_eq!(rid.page_no, FIRST_RECORD_PAGE);
        assert_eq!(rid.slot_no, 0);
        assert_eq!(file.get(rid, None).unwrap().data, b"abcdefgh");
    }

    #[test]
    fn inserting_into_an_empty_file_creates_page_one() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 4);
        assert_eq!(file.num_pages(), 1);
        file.insert(&[9u8; 4], None).unwrap();
        assert_eq!(file.num_pages(), 2);
    }

    #[test]
    fn get_rejects_bad_addresses() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 4);
        let rid = file.insert(&[1u8; 4], None).unwrap();

        let missing_page = Rid {
            page_no: 9,
            slot_no: 0,
        };
        assert!(matches!(
            file.get(missing_page, None),
            Err(StorageError::PageNotExist(9))
        ));

        let empty_slot = Rid {
            page_no: rid.page_no,
            slot_no: rid.slot_no + 1,
        };
        assert!(matches!(
            file.get(empty_slot, None),
            Err(StorageError::RecordNotFound(_))
        ));
    }

    #[test]
    fn delete_frees_the_slot_and_reinsert_reuses_it() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 8);

        let a = file.insert(b"aaaaaaaa", None).unwrap();
        let b = file.insert(b"bbbbbbbb", None).unwrap();
        let _c = file.insert(b"cccccccc", None).unwrap();

        file.delete(b, None).unwrap();
        assert!(matches!(
            file.get(b, None),
            Err(StorageError::RecordNotFound(_))
        ));

        let d = file.insert(b"dddddddd", None).unwrap();
        assert_eq!(d, b, "freed slot is reused first");
        assert_eq!(file.get(a, None).unwrap().data, b"aaaaaaaa");
        assert_eq!(file.get(d, None).unwrap().data, b"dddddddd");
    }

    #[test]
    fn update_overwrites_in_place() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 8);

        let rid = file.insert(b"aaaaaaaa", None).unwrap();
        file.update(rid, b"zzzzzzzz", None).unwrap();
        assert_eq!(file.get(rid, None).unwrap().data, b"zzzzzzzz");
    }

    #[test]
    fn insert_at_restores_the_exact_rid() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 8);

        let rid = file.insert(b"aaaaaaaa", None).unwrap();
        file.delete(rid, None).unwrap();
        file.insert_at(rid, b"aaaaaaaa").unwrap();
        assert_eq!(file.get(rid, None).unwrap().data, b"aaaaaaaa");

        // An occupied slot refuses the forced insert.
        assert!(file.insert_at(rid, b"xxxxxxxx").is_err());
    }

    #[test]
    fn filling_a_page_advances_the_free_chain() {
        let dir = tempdir().unwrap();
        // Large records keep the per-page slot count small.
        let record_size = 1000;
        let file = open_file(dir.path(), record_size);
        let per_page = file.slots_per_page();
        let buf = vec![3u8; record_size];

        for _ in 0..per_page {
            let rid = file.insert(&buf, None).unwrap();
            assert_eq!(rid.page_no, FIRST_RECORD_PAGE);
        }
        // The next insert lands on a fresh page.
        let overflow = file.insert(&buf, None).unwrap();
        assert_eq!(overflow.page_no, FIRST_RECORD_PAGE + 1);

        // Deleting from the full first page relinks it at the head.
        let victim = Rid {
            page_no: FIRST_RECORD_PAGE,
            slot_no: 0,
        };
        file.delete(victim, None).unwrap();
        let reused = file.insert(&buf, None).unwrap();
        assert_eq!(reused, victim);
    }

    #[test]
    fn bitmap_population_matches_the_page_header() {
        let dir = tempdir().unwrap();
        let file = open_file(dir.path(), 64);
        let mut rng = rand::thread_rng();
        let mut live: Vec<Rid> = Vec::new();

        for _ in 0..500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let fill: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
                live.push(file.insert(&fill, None).unwrap());
            } else {
                live.shuffle(&mut rng);
                let rid = live.pop().unwrap();
                file.delete(rid, None).unwrap();
            }

            for page_no in FIRST_RECORD_PAGE..file.num_pages() {
                let (header_count, populated) = file.page_record_count(page_no).unwrap();
                assert_eq!(header_count as usize, populated, "page {page_no} drifted");
            }
        }
    }

    #[test]
    fn header_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let bpm = Arc::new(BufferPoolManager::new(Pager::new()));
        let rid;
        {
            let file = RecordFile::create(Arc::clone(&bpm), &path, 8).unwrap();
            rid = file.insert(b"aaaaaaaa", None).unwrap();
            bpm.flush_all_pages().unwrap();
        }

        let bpm = Arc::new(BufferPoolManager::new(Pager::new()));
        let file = RecordFile::open(bpm, &path).unwrap();
        assert_eq!(file.record_size(), 8);
        assert_eq!(file.get(rid, None).unwrap().data, b"aaaaaaaa");
    }
}
