use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use cooldb_common::Lsn;
use tracing::{debug, trace};

use crate::framing::{EAGER_OVERHEAD, INDICATOR_EOL, INDICATOR_OK, INDICATOR_WRAP};

#[derive(Debug, thiserror::Error)]
pub enum RedoLogError {
    #[error("redo log has no remaining capacity before the firewall")]
    LogExhausted,

    #[error("record at lsn {0} not found in the redo log")]
    LogNotFound(Lsn),

    #[error("redo log record at lsn {0} is corrupted")]
    Corrupt(Lsn),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RedoLogResult<T> = Result<T, RedoLogError>;

/// Fixed-size circular file writer for the redo log.
///
/// `Lsn` doubles as an unwrapped logical byte address: `end_of_log` only
/// ever increases, and the physical file offset for any address is
/// `address % capacity`. The in-memory staging buffer holds every byte
/// appended since `base_lsn` that has not yet been physically flushed.
pub struct RedoLogWriter {
    file: File,
    capacity: u64,
    staging: Vec<u8>,
    /// The logical address represented by `staging[0]`.
    base_lsn: Lsn,
    /// Next logical address to be assigned to a new record.
    end_of_log: Lsn,
    /// Highest logical address whose bytes are physically durable.
    flushed_lsn: Lsn,
    /// Non-decreasing firewall: records at or above this address must not
    /// be overwritten by wrap-around.
    do_not_overwrite: Lsn,
}

impl RedoLogWriter {
    pub fn create(file: File, capacity: u64) -> Self {
        let chunk = (capacity / 8).max(64);
        Self {
            file,
            capacity,
            staging: Vec::with_capacity(chunk as usize),
            base_lsn: 1,
            end_of_log: 1,
            // Zero is reserved: it means "nothing flushed yet" and can
            // never collide with a real address, since those start at 1.
            flushed_lsn: 0,
            do_not_overwrite: 1,
        }
    }

    /// Resumes a writer after recovery has determined the true logical end
    /// of the log.
    pub fn resume(file: File, capacity: u64, end_of_log: Lsn) -> Self {
        let mut w = Self::create(file, capacity);
        w.base_lsn = end_of_log;
        w.end_of_log = end_of_log;
        w.flushed_lsn = end_of_log;
        w.do_not_overwrite = end_of_log;
        w
    }

    pub fn end_of_log(&self) -> Lsn {
        self.end_of_log
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn
    }

    pub fn set_do_not_overwrite(&mut self, lsn: Lsn) {
        assert!(lsn >= self.do_not_overwrite, "firewall must not decrease");
        self.do_not_overwrite = lsn;
    }

    /// Free space before the firewall would need to be overwritten.
    pub fn get_remaining(&self, floor_lsn: Lsn) -> u64 {
        self.capacity.saturating_sub(self.end_of_log.saturating_sub(floor_lsn))
    }

    /// Appends `body` as a new record, returning its address.
    pub fn append(&mut self, body: &[u8]) -> RedoLogResult<Lsn> {
        assert!(body.len() <= u16::MAX as usize, "record body too large to frame");
        let size = body.len() as u16;
        let needed = EAGER_OVERHEAD + size as u64;

        let phys = self.end_of_log % self.capacity;
        let remaining_before_eof = self.capacity - phys;
        if needed > remaining_before_eof {
            let skip = remaining_before_eof;
            if self.get_remaining(self.do_not_overwrite) < skip + needed {
                return Err(RedoLogError::LogExhausted);
            }
            self.push_byte(INDICATOR_WRAP);
            self.end_of_log += skip;
            trace!(skip, "redo log wrapped");
        }

        if self.get_remaining(self.do_not_overwrite) < needed {
            return Err(RedoLogError::LogExhausted);
        }

        let address = self.end_of_log;
        self.push_byte(INDICATOR_OK);
        self.push_bytes(&size.to_le_bytes());
        self.push_bytes(body);
        self.end_of_log += EAGER_OVERHEAD + size as u64;
        trace!(address, size, "redo record appended");
        Ok(address)
    }

    fn push_byte(&mut self, b: u8) {
        self.staging.push(b);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
    }

    /// Flushes every staged byte through the record starting at (or
    /// containing) `target_lsn`, writes a trailing EOL marker, and
    /// compacts the staging buffer's committed prefix. `target_lsn` may be
    /// `end_of_log()` itself, meaning "flush everything appended so far" —
    /// there is no record header at that address to inspect.
    ///
    /// `flushed_lsn` of 0 is the "nothing flushed yet" sentinel, distinct
    /// from any real address since those are never assigned 0.
    pub fn flush_to(&mut self, target_lsn: Lsn) -> RedoLogResult<()> {
        if self.flushed_lsn != 0 && target_lsn <= self.flushed_lsn {
            return Ok(());
        }
        let commit_mark = if target_lsn >= self.end_of_log {
            self.end_of_log
        } else {
            let start_off = (target_lsn - self.base_lsn) as usize;
            let indicator = self.staging[start_off];
            if indicator == INDICATOR_WRAP {
                target_lsn + 1
            } else {
                let size = u16::from_le_bytes([self.staging[start_off + 1], self.staging[start_off + 2]]) as u64;
                target_lsn + EAGER_OVERHEAD + size
            }
        };

        let flushed_from = if self.flushed_lsn == 0 { self.base_lsn } else { self.flushed_lsn };
        self.flush_range(flushed_from, commit_mark)?;
        let eol_phys = commit_mark % self.capacity;
        self.write_physical(eol_phys, &[INDICATOR_EOL])?;
        self.file.sync_all()?;

        self.flushed_lsn = commit_mark;
        let drop_len = (self.flushed_lsn - self.base_lsn) as usize;
        self.staging.drain(0..drop_len);
        self.base_lsn = self.flushed_lsn;
        debug!(flushed_lsn = self.flushed_lsn, "redo log flushed");
        Ok(())
    }

    fn flush_range(&mut self, from: Lsn, to: Lsn) -> RedoLogResult<()> {
        if to <= from {
            return Ok(());
        }
        let len = (to - from) as usize;
        let staging_start = (from - self.base_lsn) as usize;
        let bytes = self.staging[staging_start..staging_start + len].to_vec();
        let phys_from = from % self.capacity;
        if phys_from + len as u64 <= self.capacity {
            self.write_physical(phys_from, &bytes)?;
        } else {
            let first_len = (self.capacity - phys_from) as usize;
            self.write_physical(phys_from, &bytes[..first_len])?;
            self.write_physical(0, &bytes[first_len..])?;
        }
        Ok(())
    }

    fn write_physical(&mut self, phys_offset: u64, bytes: &[u8]) -> RedoLogResult<()> {
        self.file.seek(SeekFrom::Start(phys_offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    fn writer(capacity: u64) -> RedoLogWriter {
        RedoLogWriter::create(tempfile().unwrap(), capacity)
    }

    #[test]
    fn append_then_flush_advances_watermarks() {
        let mut w = writer(256);
        let addr = w.append(b"hello").unwrap();
        assert_eq!(addr, 1, "zero is reserved; the first record must land at lsn 1");
        w.flush_to(w.end_of_log()).unwrap();
        assert_eq!(w.flushed_lsn(), w.end_of_log());
    }

    #[test]
    fn wrap_emits_wrap_indicator_when_record_does_not_fit() {
        let mut w = writer(16);
        // First record fills most of the file; second must wrap.
        w.append(&[0u8; 8]).unwrap();
        let before = w.end_of_log();
        let addr2 = w.append(&[1u8; 4]).unwrap();
        assert!(addr2 > before, "second record's address should be past the wrap skip");
    }

    #[test]
    fn exhaustion_is_reported_when_firewall_blocks_reuse() {
        let mut w = writer(16);
        w.set_do_not_overwrite(1);
        w.append(&[0u8; 8]).unwrap();
        let err = w.append(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, RedoLogError::LogExhausted));
    }
}
