//! Manages the buffer pool, a collection of in-memory frames that cache disk
//! pages across every open file.
//!
//! Page bytes live in per-frame `RwLock`s so readers of different pages
//! never contend; everything else (residency, pins, dirty and reference
//! bits, the clock hand) is bookkeeping behind one mutex.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{StorageError, StorageResult};
use crate::pager::Pager;
use crate::{FileId, Page, PageId};

const BUFFER_POOL_SIZE: usize = 128;

/// Bookkeeping for one frame. `page_id` doubles as the occupancy flag:
/// `None` means the frame is empty and the other fields are meaningless.
#[derive(Debug, Default)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    /// Second-chance bit: set on every pin, cleared when the clock hand
    /// passes by.
    referenced: bool,
    dirty: bool,
}

/// All mutable pool state, guarded as one unit.
struct PoolState {
    page_table: HashMap<PageId, usize>,
    meta: Vec<FrameMeta>,
    hand: usize,
}

/// The buffer pool manager.
pub struct BufferPoolManager {
    pub pager: Mutex<Pager>,
    pages: Vec<RwLock<Page>>,
    state: Mutex<PoolState>,
}

/// An RAII pin on a page. The page stays in its frame for the guard's
/// lifetime and is unpinned on drop, whatever the exit path.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame_idx: usize,
}

impl<'a> PageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.bpm.pages[self.frame_idx].read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.bpm.state.lock().meta[self.frame_idx].dirty = true;
        self.bpm.pages[self.frame_idx].write()
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.bpm.state.lock();
        let meta = &mut state.meta[self.frame_idx];
        if meta.pin_count > 0 {
            meta.pin_count -= 1;
        }
    }
}

impl BufferPoolManager {
    pub fn new(pager: Pager) -> Self {
        let mut pages = Vec::with_capacity(BUFFER_POOL_SIZE);
        let mut meta = Vec::with_capacity(BUFFER_POOL_SIZE);
        for _ in 0..BUFFER_POOL_SIZE {
            pages.push(RwLock::new(Page::new(PageId {
                file_id: 0,
                page_no: 0,
            })));
            meta.push(FrameMeta::default());
        }
        Self {
            pager: Mutex::new(pager),
            pages,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                meta,
                hand: 0,
            }),
        }
    }

    /// Pins `page_id`, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageGuard<'_>> {
        let mut state = self.state.lock();
        if let Some(&frame_idx) = state.page_table.get(&page_id) {
            let meta = &mut state.meta[frame_idx];
            meta.pin_count += 1;
            meta.referenced = true;
            return Ok(PageGuard {
                bpm: self,
                page_id,
                frame_idx,
            });
        }

        let frame_idx = self.claim_frame(&mut state, page_id)?;
        let from_disk = match self.pager.lock().read_page(page_id) {
            Ok(page) => page,
            Err(err) => {
                // Give the claimed frame back before surfacing the error.
                state.page_table.remove(&page_id);
                state.meta[frame_idx] = FrameMeta::default();
                return Err(err.into());
            }
        };
        *self.pages[frame_idx].write() = from_disk;
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame_idx,
        })
    }

    /// Allocates a fresh page in `file_id` and pins it, zero-filled and
    /// already dirty.
    pub fn new_page(&self, file_id: FileId) -> StorageResult<PageGuard<'_>> {
        let mut state = self.state.lock();
        let page_no = self.pager.lock().allocate_page(file_id)?;
        let page_id = PageId { file_id, page_no };

        let frame_idx = self.claim_frame(&mut state, page_id)?;
        state.meta[frame_idx].dirty = true;
        *self.pages[frame_idx].write() = Page::new(page_id);
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame_idx,
        })
    }

    /// Writes `page_id` back to disk if it is resident and dirty.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let mut state = self.state.lock();
        if let Some(&frame_idx) = state.page_table.get(&page_id) {
            self.write_back(&mut state, frame_idx)?;
        }
        Ok(())
    }

    /// Writes every resident dirty page back to disk.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        for frame_idx in 0..state.meta.len() {
            self.write_back(&mut state, frame_idx)?;
        }
        Ok(())
    }

    /// Forgets every cached frame of `file_id` and closes the file. Dirty
    /// frames are discarded rather than written: the caller is deleting
    /// the file.
    pub fn drop_file(&self, file_id: FileId) -> StorageResult<()> {
        let mut state = self.state.lock();
        let PoolState {
            page_table, meta, ..
        } = &mut *state;
        page_table.retain(|page_id, frame_idx| {
            if page_id.file_id == file_id {
                meta[*frame_idx] = FrameMeta::default();
                false
            } else {
                true
            }
        });
        drop(state);
        self.pager.lock().close_file(file_id)?;
        Ok(())
    }

    /// Reserves a frame for `incoming` and records it as resident and
    /// pinned once. Evicts (writing back if dirty) whatever occupied the
    /// frame before.
    fn claim_frame(&self, state: &mut PoolState, incoming: PageId) -> StorageResult<usize> {
        let frame_idx = self.pick_victim(state)?;

        if let Some(evicted) = state.meta[frame_idx].page_id {
            self.write_back(state, frame_idx)?;
            state.page_table.remove(&evicted);
        }

        let meta = &mut state.meta[frame_idx];
        meta.page_id = Some(incoming);
        meta.pin_count = 1;
        meta.referenced = true;
        meta.dirty = false;
        state.page_table.insert(incoming, frame_idx);
        Ok(frame_idx)
    }

    /// An empty frame if one exists, otherwise a clock-sweep victim: an
    /// unpinned frame survives one lap on its reference bit, then goes.
    fn pick_victim(&self, state: &mut PoolState) -> StorageResult<usize> {
        if let Some(frame_idx) = state.meta.iter().position(|m| m.page_id.is_none()) {
            return Ok(frame_idx);
        }

        let frame_count = state.meta.len();
        for _ in 0..(frame_count * 2) {
            let frame_idx = state.hand;
            state.hand = (state.hand + 1) % frame_count;

            let meta = &mut state.meta[frame_idx];
            if meta.pin_count > 0 {
                continue;
            }
            if meta.referenced {
                meta.referenced = false;
                continue;
            }
            return Ok(frame_idx);
        }

        Err(StorageError::Internal(
            "all buffer pool frames are pinned".into(),
        ))
    }

    /// Writes one frame back to disk if it holds a dirty page.
    fn write_back(&self, state: &mut PoolState, frame_idx: usize) -> StorageResult<()> {
        let meta = &mut state.meta[frame_idx];
        if meta.page_id.is_some() && meta.dirty {
            let page = self.pages[frame_idx].read().clone();
            self.pager.lock().write_page(&page)?;
            meta.dirty = false;
        }
        Ok(())
    }
}
