use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use cooldb_common::PageId;
use tracing::{debug, trace};

/// Errors arising from page-granular file I/O. Partial reads/writes are
/// always fatal — the spec treats them as unrecoverable corruption rather
/// than something to retry.
#[derive(Debug, thiserror::Error)]
pub enum FileManagerError {
    #[error("file-id {0} has not been registered with add()")]
    UnknownFile(i32),

    #[error("partial I/O on file-id {file_id} at page {page_id}: expected {expected} bytes, got {actual}")]
    PartialIo { file_id: i32, page_id: i32, expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type FileManagerResult<T> = Result<T, FileManagerError>;

/// Owns the open file handles backing every segment/heap file known to this
/// instance, keyed by a small dense file-id. Holds no locks of its own —
/// callers (the buffer pool) serialize access to any one frame; concurrent
/// access to distinct files is safe because each `File` handle's positioned
/// reads/writes (`seek` + `read_exact`/`write_all`) are independent syscalls.
pub struct FileManager {
    files: Vec<Option<File>>,
    page_size: usize,
}

impl FileManager {
    pub fn new(page_size: usize) -> Self {
        Self { files: Vec::new(), page_size }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Registers an already-opened file under `file_id`. The caller is
    /// responsible for having opened it with the read/write access the
    /// workload requires.
    pub fn add(&mut self, file_id: i32, file: File) {
        let idx = file_id as usize;
        if idx >= self.files.len() {
            self.files.resize_with(idx + 1, || None);
        }
        self.files[idx] = Some(file);
        debug!(file_id, "file registered with file manager");
    }

    /// Convenience for tests and recovery bootstrap: open-or-create a file
    /// on disk and register it.
    pub fn open(&mut self, file_id: i32, path: &std::path::Path) -> FileManagerResult<()> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        self.add(file_id, file);
        Ok(())
    }

    fn file_mut(&mut self, file_id: i32) -> FileManagerResult<&mut File> {
        self.files
            .get_mut(file_id as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(FileManagerError::UnknownFile(file_id))
    }

    fn offset_of(&self, page_id: i32) -> u64 {
        page_id as u64 * self.page_size as u64
    }

    /// Reads one page-sized buffer from disk at `page`'s offset.
    pub fn fetch(&mut self, page: PageId, buffer: &mut [u8]) -> FileManagerResult<()> {
        assert_eq!(buffer.len(), self.page_size, "buffer must be exactly one page");
        let offset = self.offset_of(page.page_id);
        let page_size = self.page_size;
        let file_id = page.file_id;
        let file = self.file_mut(file_id)?;
        file.seek(SeekFrom::Start(offset))?;
        let n = read_fill(file, buffer)?;
        if n != page_size {
            return Err(FileManagerError::PartialIo {
                file_id,
                page_id: page.page_id,
                expected: page_size,
                actual: n,
            });
        }
        trace!(%page, "page fetched");
        Ok(())
    }

    /// Writes one page-sized buffer to disk at `page`'s offset, optionally
    /// fsyncing afterward.
    pub fn flush(&mut self, page: PageId, buffer: &[u8], force: bool) -> FileManagerResult<()> {
        assert_eq!(buffer.len(), self.page_size, "buffer must be exactly one page");
        let offset = self.offset_of(page.page_id);
        let file_id = page.file_id;
        let file = self.file_mut(file_id)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;
        if force {
            file.sync_all()?;
        }
        trace!(%page, force, "page flushed");
        Ok(())
    }

    /// Fsyncs the given file-id without writing anything new.
    pub fn force(&mut self, file_id: i32) -> FileManagerResult<()> {
        self.file_mut(file_id)?.sync_all()?;
        Ok(())
    }

    /// Extends a file by `pages` zero-filled pages, returning the page-id
    /// of the first newly allocated page.
    pub fn extend(&mut self, file_id: i32, pages: u32) -> FileManagerResult<i32> {
        let page_size = self.page_size;
        let file = self.file_mut(file_id)?;
        let len = file.metadata()?.len();
        assert_eq!(len % page_size as u64, 0, "file length must be page-aligned");
        let first_new_page = (len / page_size as u64) as i32;
        let zero = vec![0u8; page_size];
        for _ in 0..pages {
            file.write_all(&zero)?;
        }
        file.sync_all()?;
        Ok(first_new_page)
    }
}

fn read_fill(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager_with_file(page_size: usize) -> (FileManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut mgr = FileManager::new(page_size);
        mgr.open(0, &dir.path().join("data.0")).unwrap();
        (mgr, dir)
    }

    #[test]
    fn extend_then_flush_then_fetch_roundtrips() {
        let (mut mgr, _dir) = manager_with_file(64);
        let first = mgr.extend(0, 4).unwrap();
        assert_eq!(first, 0);

        let mut page = vec![0xAB; 64];
        mgr.flush(PageId::new(0, 2), &page, true).unwrap();

        let mut back = vec![0u8; 64];
        mgr.fetch(PageId::new(0, 2), &mut back).unwrap();
        assert_eq!(back, page);

        page.fill(0);
        mgr.fetch(PageId::new(0, 0), &mut page).unwrap();
        assert_eq!(page, vec![0u8; 64]);
    }

    #[test]
    fn fetch_from_unknown_file_errors() {
        let mut mgr = FileManager::new(64);
        let mut buf = vec![0u8; 64];
        let err = mgr.fetch(PageId::new(5, 0), &mut buf).unwrap_err();
        assert!(matches!(err, FileManagerError::UnknownFile(5)));
    }

    #[test]
    fn fetch_past_end_of_file_is_partial_io() {
        let (mut mgr, _dir) = manager_with_file(64);
        mgr.extend(0, 1).unwrap();
        let mut buf = vec![0u8; 64];
        let err = mgr.fetch(PageId::new(0, 5), &mut buf).unwrap_err();
        assert!(matches!(err, FileManagerError::PartialIo { .. }));
    }
}
