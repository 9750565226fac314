use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::{FileId, Page, PageId, PageNo, PAGE_SIZE};

struct FileEntry {
    file: File,
    num_pages: PageNo,
}

/// Synchronous page I/O over the set of open database files.
pub struct Pager {
    files: HashMap<FileId, FileEntry>,
    next_file_id: FileId,
}

impl Pager {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            next_file_id: 0,
        }
    }

    /// Opens (creating if absent) the file at `path` and registers it.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<FileId> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as PageNo;
        let file_id = self.next_file_id;
        self.next_file_id += 1;
        debug!("pager: opened {path_ref:?} as file {file_id} ({num_pages} pages)");

        self.files.insert(file_id, FileEntry { file, num_pages });
        Ok(file_id)
    }

    pub fn close_file(&mut self, file_id: FileId) -> io::Result<()> {
        let entry = self.entry_mut(file_id)?;
        entry.file.sync_all()?;
        self.files.remove(&file_id);
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId) -> io::Result<Page> {
        let mut page = Page::new(page_id);
        let entry = self.entry_mut(page_id.file_id)?;
        if page_id.page_no < 0 || page_id.page_no >= entry.num_pages {
            // Reads past the end hand back a zeroed page; the buffer pool
            // fills new pages this way before they are first written.
            return Ok(page);
        }

        let offset = page_id.page_no as u64 * PAGE_SIZE as u64;
        entry.file.seek(SeekFrom::Start(offset))?;
        let bytes_read = entry.file.read(&mut page.data)?;
        if bytes_read < PAGE_SIZE {
            page.data[bytes_read..].fill(0);
        }
        Ok(page)
    }

    pub fn write_page(&mut self, page: &Page) -> io::Result<()> {
        let entry = self.entry_mut(page.id.file_id)?;
        let offset = page.id.page_no as u64 * PAGE_SIZE as u64;
        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(&page.data)?;
        entry.file.sync_all()?;
        if page.id.page_no >= entry.num_pages {
            entry.num_pages = page.id.page_no + 1;
        }
        Ok(())
    }

    /// Hands out the next page number of `file_id`.
    pub fn allocate_page(&mut self, file_id: FileId) -> io::Result<PageNo> {
        let entry = self.entry_mut(file_id)?;
        let page_no = entry.num_pages;
        entry.num_pages += 1;
        debug!("pager: allocated page {page_no} in file {file_id}");
        Ok(page_no)
    }

    pub fn num_pages(&self, file_id: FileId) -> io::Result<PageNo> {
        self.files
            .get(&file_id)
            .map(|entry| entry.num_pages)
            .ok_or_else(|| io::Error::other(format!("file {file_id} is not open")))
    }

    fn entry_mut(&mut self, file_id: FileId) -> io::Result<&mut FileEntry> {
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| io::Error::other(format!("file {file_id} is not open")))
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.tbl");

        let mut pager = Pager::new();
        let file_id = pager.open_file(&path).unwrap();

        let page_no = pager.allocate_page(file_id).unwrap();
        assert_eq!(page_no, 0);

        let mut page = pager
            .read_page(PageId { file_id, page_no })
            .unwrap();
        page.write_u32(0, 123);
        pager.write_page(&page).unwrap();

        let mut pager = Pager::new();
        let file_id = pager.open_file(&path).unwrap();
        assert_eq!(pager.num_pages(file_id).unwrap(), 1);
        let page = pager
            .read_page(PageId { file_id, page_no: 0 })
            .unwrap();
        assert_eq!(page.read_u32(0), 123);
    }

    #[test]
    fn reading_past_the_end_yields_a_zeroed_page() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::new();
        let file_id = pager.open_file(dir.path().join("empty.tbl")).unwrap();

        let page = pager
            .read_page(PageId { file_id, page_no: 5 })
            .unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn each_open_file_gets_its_own_id() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::new();
        let a = pager.open_file(dir.path().join("a.tbl")).unwrap();
        let b = pager.open_file(dir.path().join("b.tbl")).unwrap();
        assert_ne!(a, b);
        assert!(pager.read_page(PageId { file_id: 99, page_no: 0 }).is_err());
    }
}
