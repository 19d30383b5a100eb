use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use cooldb_common::Lsn;

use crate::framing::{INDICATOR_EOL, INDICATOR_OK, INDICATOR_WRAP};
use crate::writer::{RedoLogError, RedoLogResult};

/// Independent read-only handle onto a redo log file, used both for normal
/// record lookups and for the recovery-time forward scan.
pub struct RedoLogReader {
    file: File,
    capacity: u64,
}

impl RedoLogReader {
    pub fn open(file: File, capacity: u64) -> Self {
        Self { file, capacity }
    }

    /// Dereferences a single record at `address`, following a WRAP
    /// indicator transparently.
    pub fn read(&mut self, address: Lsn) -> RedoLogResult<Vec<u8>> {
        let mut phys = address % self.capacity;
        loop {
            let indicator = self.read_byte(phys)?;
            match indicator {
                INDICATOR_WRAP => {
                    phys = 0;
                    continue;
                }
                INDICATOR_OK => {
                    let size_bytes = self.read_exact_at(phys + 1, 2)?;
                    let size = u16::from_le_bytes([size_bytes[0], size_bytes[1]]) as u64;
                    let body = self.read_exact_at(phys + 3, size as usize)?;
                    return Ok(body);
                }
                INDICATOR_EOL => return Err(RedoLogError::LogNotFound(address)),
                _ => return Err(RedoLogError::Corrupt(address)),
            }
        }
    }

    /// Iterates records with addresses in `[start, end)`, the way recovery
    /// walks the redo log forward from a checkpoint's begin-LSN.
    pub fn iter_from(&mut self, start: Lsn, end: Lsn) -> RedoLogIterator<'_> {
        RedoLogIterator { reader: self, cursor: start, end }
    }

    fn read_byte(&mut self, phys: u64) -> RedoLogResult<u8> {
        Ok(self.read_exact_at(phys, 1)?[0])
    }

    fn read_exact_at(&mut self, phys: u64, len: usize) -> RedoLogResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        if phys + len as u64 <= self.capacity {
            self.file.seek(SeekFrom::Start(phys))?;
            self.file.read_exact(&mut buf)?;
        } else {
            let first_len = (self.capacity - phys) as usize;
            self.file.seek(SeekFrom::Start(phys))?;
            self.file.read_exact(&mut buf[..first_len])?;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.read_exact(&mut buf[first_len..])?;
        }
        Ok(buf)
    }
}

pub struct RedoLogIterator<'a> {
    reader: &'a mut RedoLogReader,
    cursor: Lsn,
    end: Lsn,
}

impl<'a> Iterator for RedoLogIterator<'a> {
    type Item = RedoLogResult<(Lsn, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let address = self.cursor;
        match self.reader.read(address) {
            Ok(body) => {
                self.cursor = address + 3 + body.len() as u64;
                Some(Ok((address, body)))
            }
            Err(e) => {
                self.cursor = self.end;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::RedoLogWriter;
    use tempfile::tempfile;

    fn reopen(file: &File) -> File {
        file.try_clone().unwrap()
    }

    #[test]
    fn read_after_flush_returns_the_written_body() {
        let file = tempfile().unwrap();
        let mut w = RedoLogWriter::create(reopen(&file), 256);
        let addr = w.append(b"payload").unwrap();
        w.flush_to(w.end_of_log()).unwrap();

        let mut r = RedoLogReader::open(reopen(&file), 256);
        let body = r.read(addr).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn iterator_walks_multiple_records_in_order() {
        let file = tempfile().unwrap();
        let mut w = RedoLogWriter::create(reopen(&file), 256);
        let a1 = w.append(b"one").unwrap();
        let _a2 = w.append(b"two").unwrap();
        w.flush_to(w.end_of_log()).unwrap();

        let mut r = RedoLogReader::open(reopen(&file), 256);
        let records: Vec<_> = r.iter_from(a1, w.end_of_log()).collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, b"one");
        assert_eq!(records[1].1, b"two");
    }
}
