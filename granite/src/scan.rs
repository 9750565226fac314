//! A forward cursor over the occupied slots of a record file.

use std::sync::Arc;

use crate::errors::StorageResult;
use crate::record::RecordFile;
use crate::{Rid, FIRST_RECORD_PAGE, NO_PAGE};

/// Walks a record file's set bitmap bits page by page. The cursor is not
/// restartable and offers no snapshot stability; callers hold at least a
/// table IS lock to keep the structure steady underneath it.
pub struct RecordScan {
    file: Arc<RecordFile>,
    rid: Rid,
}

impl RecordScan {
    /// Positions the cursor on the first record, or at end for an empty
    /// file.
    pub fn new(file: Arc<RecordFile>) -> StorageResult<Self> {
        let mut scan = Self {
            file,
            rid: Rid {
                page_no: FIRST_RECORD_PAGE,
                slot_no: -1,
            },
        };
        scan.advance()?;
        Ok(scan)
    }

    /// Moves to the next occupied slot.
    pub fn next(&mut self) -> StorageResult<()> {
        self.advance()
    }

    /// The cursor position. Only meaningful while `!is_end()`.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn is_end(&self) -> bool {
        self.rid.page_no == NO_PAGE
    }

    fn advance(&mut self) -> StorageResult<()> {
        while self.rid.page_no != NO_PAGE {
            if self.rid.page_no >= self.file.num_pages() {
                self.rid.page_no = NO_PAGE;
                break;
            }
            match self.file.next_set_slot(self.rid.page_no, self.rid.slot_no)? {
                Some(slot_no) => {
                    self.rid.slot_no = slot_no;
                    return Ok(());
                }
                None => {
                    self.rid.page_no += 1;
                    self.rid.slot_no = -1;
                }
            }
        }
        Ok(())
    }
}
