use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::page::UndoPage;
use crate::writer::{UndoLogError, UndoLogResult};

/// A small in-process cache of the undo log's fixed-size pages, backed by
/// a single file. Every page not already resident is faulted in on first
/// touch and kept resident for the life of the writer — the undo log's
/// working set (active + free extents) is expected to be small relative
/// to the main data buffer pool, so no eviction policy is implemented.
pub struct PageCache {
    file: File,
    page_size: usize,
    pages: HashMap<u32, UndoPage>,
    dirty: std::collections::HashSet<u32>,
}

impl PageCache {
    pub fn new(file: File, page_size: usize) -> Self {
        Self { file, page_size, pages: HashMap::new(), dirty: std::collections::HashSet::new() }
    }

    pub fn file_len_pages(&self) -> UndoLogResult<u64> {
        let len = self.file.metadata()?.len();
        Ok(len / self.page_size as u64)
    }

    fn load(&mut self, page_num: u32) -> UndoLogResult<()> {
        if self.pages.contains_key(&page_num) {
            return Ok(());
        }
        let offset = page_num as u64 * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(offset))?;
        let n = read_fill(&mut self.file, &mut buf)?;
        if n != self.page_size {
            return Err(UndoLogError::Corrupt(format!("short read on undo page {page_num}")));
        }
        self.pages.insert(page_num, UndoPage::decode(&buf));
        Ok(())
    }

    pub fn get(&mut self, page_num: u32) -> UndoLogResult<&UndoPage> {
        self.load(page_num)?;
        Ok(self.pages.get(&page_num).unwrap())
    }

    pub fn get_mut(&mut self, page_num: u32) -> UndoLogResult<&mut UndoPage> {
        self.load(page_num)?;
        self.dirty.insert(page_num);
        Ok(self.pages.get_mut(&page_num).unwrap())
    }

    /// Registers a brand-new page (freshly allocated, never on disk yet)
    /// without attempting to read it first.
    pub fn put_new(&mut self, page_num: u32, page: UndoPage) {
        self.pages.insert(page_num, page);
        self.dirty.insert(page_num);
    }

    pub fn flush_page(&mut self, page_num: u32) -> UndoLogResult<()> {
        let page = self.pages.get(&page_num).ok_or_else(|| UndoLogError::Corrupt(format!("flush of unloaded page {page_num}")))?;
        let buf = page.encode(self.page_size);
        let offset = page_num as u64 * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        self.dirty.remove(&page_num);
        Ok(())
    }

    pub fn flush_range(&mut self, pages: impl Iterator<Item = u32>) -> UndoLogResult<()> {
        for p in pages {
            self.flush_page(p)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> UndoLogResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads page 0 (the control page) without the `UndoPage` meta/data
    /// split applied to every other page — its layout is owned entirely by
    /// `ControlPage::encode`/`decode`.
    pub fn read_control_raw(&mut self) -> UndoLogResult<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(0))?;
        let n = read_fill(&mut self.file, &mut buf)?;
        if n != self.page_size {
            return Err(UndoLogError::Corrupt("short read on control page".into()));
        }
        Ok(buf)
    }

    pub fn write_control_raw(&mut self, bytes: &[u8]) -> UndoLogResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(bytes)?;
        Ok(())
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
