use std::sync::Mutex;

use cooldb_buffer::WalDelegate;
use cooldb_common::{CoreResult, Lsn, RedoLogRecord, UndoLogRecord, UndoPointer};
use cooldb_redolog::{RedoLogIterator, RedoLogReader, RedoLogWriter};
use cooldb_undolog::UndoLogWriter;
use tracing::debug;

use crate::codec::{decode, encode};
use crate::error::{LogManagerError, LogManagerResult};

/// Binds the redo and undo log writers into the single entry point the
/// rest of the core depends on: writes are always undo-then-redo so the
/// redo record's `undoNxtLSN` can point at the undo record that would
/// reverse it, and flush/firewall movement are always driven from here so
/// the two logs' watermarks never drift apart.
pub struct LogManager {
    redo: Mutex<RedoLogWriter>,
    undo: Mutex<UndoLogWriter>,
}

impl LogManager {
    pub fn new(redo: RedoLogWriter, undo: UndoLogWriter) -> Self {
        Self { redo: Mutex::new(redo), undo: Mutex::new(undo) }
    }

    /// Writes the undo record first, copies its address into the redo
    /// record's `undoNxtLSN`, then writes the redo record. Returns both
    /// LSNs so the caller can stamp the page header and the transaction's
    /// `undoNxtLSN` chain.
    ///
    /// `page_undo_nxt_lsn` links the new undo record into the page's undo
    /// chain (what MVCC reconstruction walks); `trans_prev_lsn` links it
    /// into the transaction's own undo chain (what abort and recovery's
    /// loser-undo pass walk) — the two chains thread the same record in
    /// two independent orders.
    pub fn write_undo_redo(
        &self,
        mut redo_record: RedoLogRecord,
        page_undo_nxt_lsn: UndoPointer,
        trans_prev_lsn: UndoPointer,
    ) -> LogManagerResult<(UndoPointer, Lsn)> {
        let undo_record = UndoLogRecord::new(redo_record.clone(), page_undo_nxt_lsn, trans_prev_lsn);
        let undo_address = {
            let mut undo = self.undo.lock().unwrap();
            undo.write(undo_record)?
        };
        redo_record.undo_nxt_lsn = undo_address;

        let redo_lsn = {
            let mut redo = self.redo.lock().unwrap();
            redo.append(&encode(&redo_record))?
        };
        debug!(?undo_address, redo_lsn, "undo+redo pair written");
        Ok((undo_address, redo_lsn))
    }

    /// Writes a redo-only record (checkpoints, commit marks) with no undo
    /// counterpart.
    pub fn write_redo(&self, redo_record: &RedoLogRecord) -> LogManagerResult<Lsn> {
        let mut redo = self.redo.lock().unwrap();
        Ok(redo.append(&encode(redo_record))?)
    }

    pub fn flush_to(&self, lsn: Lsn) -> LogManagerResult<()> {
        self.redo.lock().unwrap().flush_to(lsn)?;
        Ok(())
    }

    pub fn move_firewall_to(&self, lsn: Lsn) {
        self.redo.lock().unwrap().set_do_not_overwrite(lsn);
    }

    pub fn gc_undo_to(&self, floor: UndoPointer) -> LogManagerResult<()> {
        self.undo.lock().unwrap().set_min_undo(floor)?;
        Ok(())
    }

    pub fn flush_undo(&self) -> LogManagerResult<()> {
        self.undo.lock().unwrap().flush()?;
        Ok(())
    }

    pub fn read_undo(&self, address: UndoPointer) -> LogManagerResult<UndoLogRecord> {
        Ok(self.undo.lock().unwrap().read(address)?)
    }

    pub fn end_of_log(&self) -> Lsn {
        self.redo.lock().unwrap().end_of_log()
    }

    pub fn start_of_log(&self) -> Lsn {
        0
    }

    pub fn remaining(&self, floor: Lsn) -> u64 {
        self.redo.lock().unwrap().get_remaining(floor)
    }

    pub fn end_of_undo_log(&self) -> Lsn {
        self.undo.lock().unwrap().end_of_log()
    }

    /// Opens an independent reader over the redo log for recovery's
    /// forward scan, bounded to `[start, end)`.
    pub fn redo_iter(&self, reader: &mut RedoLogReader, start: Lsn, end: Lsn) -> Vec<LogManagerResult<(Lsn, RedoLogRecord)>> {
        fn decode_one(raw: std::result::Result<(Lsn, Vec<u8>), cooldb_redolog::RedoLogError>) -> LogManagerResult<(Lsn, RedoLogRecord)> {
            let (lsn, body) = raw.map_err(LogManagerError::Redo)?;
            let mut record = decode(&body).map_err(LogManagerError::Codec)?;
            record.lsn = lsn;
            Ok((lsn, record))
        }
        let iter: RedoLogIterator<'_> = reader.iter_from(start, end);
        iter.map(decode_one).collect()
    }
}

/// Adapts `LogManager` to the buffer pool's WAL-before-write contract.
impl WalDelegate for LogManager {
    fn flush_to(&self, lsn: Lsn) -> CoreResult<()> {
        self.flush_to(lsn).map_err(Into::into)
    }
}
