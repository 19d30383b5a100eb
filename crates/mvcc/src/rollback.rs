use std::collections::HashMap;

use cooldb_common::{CoreError, CoreResult, Lsn, PageHeader, TransId, Transaction, UndoDispatchTable, UndoPointer};
use cooldb_logmgr::LogManager;
use tracing::trace;

/// Reconstructs historical page versions for MVCC reads by walking a
/// page's undo chain backward and compensating any update not visible to
/// a transaction's snapshot, in place, inside the pinned frame it was
/// handed.
///
/// Holds no state of its own between calls — every call is independent and
/// touches only the frame passed to it, so it is safe to share one instance
/// across threads.
pub struct RollbackEngine<'a> {
    log: &'a LogManager,
    dispatch: &'a UndoDispatchTable,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(log: &'a LogManager, dispatch: &'a UndoDispatchTable) -> Self {
        Self { log, dispatch }
    }

    /// A page needs reconstruction for `t` iff its most recent undo record
    /// is newer than `t`'s snapshot horizon — i.e. some update landed on
    /// the page after `t` began that `t` must not see.
    pub fn needs_rollback(&self, txn: &Transaction, header: &PageHeader) -> bool {
        header.page_undo_nxt_lsn.lsn >= txn.commit_lsn.lsn
    }

    /// Walks `page`'s undo chain from `header.page_undo_nxt_lsn` backward
    /// until the LSN drops below `t.commitLSN.lsn`, undoing (via the
    /// registered per-segment-type callback) every update invisible to
    /// `t`'s snapshot, then rewrites `header.page_undo_nxt_lsn` so a repeat
    /// call on the same pinned frame is a no-op.
    ///
    /// `cusp` lets the caller distinguish "reconstructing for a read" (skip
    /// even the reader's own later updates on this page) from
    /// "reconstructing up to a savepoint" (only skip the reader's own
    /// updates at or before `cusp`).
    pub fn rollback(&self, txn: &Transaction, frame: &mut [u8], header: &mut PageHeader, cusp: Lsn) -> CoreResult<()> {
        let start = header_rollback_floor(txn);
        let mut highest: HashMap<TransId, Lsn> = HashMap::new();
        let mut next = header.page_undo_nxt_lsn;

        while !next.is_null() && next.lsn >= start {
            let undo_rec = self.log.read_undo(next).map_err(|e| map_read_error(txn.trans_id, e))?;
            let rec_trans = undo_rec.trans_id();

            if txn.commit_list.is_committed(rec_trans) {
                trace!(rec_trans, lsn = next.lsn, "update already visible, skipping");
                next = undo_rec.page_undo_nxt_lsn;
                continue;
            }

            let recorded = highest.get(&rec_trans).copied().unwrap_or(Lsn::MAX);
            if recorded >= next.lsn {
                if undo_rec.is_clr() {
                    highest.insert(rec_trans, undo_rec.redo.undo_nxt_lsn.lsn);
                } else if rec_trans != txn.trans_id || next.lsn > cusp {
                    self.dispatch.dispatch(&undo_rec, frame)?;
                }
            }

            next = undo_rec.page_undo_nxt_lsn;
        }

        header.page_undo_nxt_lsn = UndoPointer { lsn: start.saturating_sub(1), ..UndoPointer::NULL };
        Ok(())
    }
}

fn header_rollback_floor(txn: &Transaction) -> Lsn {
    txn.commit_lsn.lsn
}

fn map_read_error(trans: TransId, e: cooldb_logmgr::LogManagerError) -> CoreError {
    match CoreError::from(e) {
        CoreError::LogNotFound(lsn) => CoreError::RollbackFailed { trans, reason: format!("undo record at lsn {lsn} missing") },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooldb_common::{CommitListSnapshot, PageId, RecordType, RedoLogRecord, UndoCallback};
    use cooldb_redolog::RedoLogWriter;
    use cooldb_undolog::UndoLogWriter;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::tempfile;

    fn manager() -> LogManager {
        let redo = RedoLogWriter::create(tempfile().unwrap(), 4096);
        let undo = UndoLogWriter::create(tempfile().unwrap(), 256, 4).unwrap();
        LogManager::new(redo, undo)
    }

    fn snapshot_seeing_nobody(base: TransId) -> CommitListSnapshot {
        CommitListSnapshot { base_trans_id: base, bits: vec![0], earliest_commit_lsn: UndoPointer::NULL, commit_trans_id: base }
    }

    fn write_update(mgr: &LogManager, trans_id: TransId, page_prev: UndoPointer, payload: u8) -> UndoPointer {
        let redo_record = RedoLogRecord::new(RecordType::Update, trans_id, PageId::new(0, 1), PageId::new(0, 1), 1, 1)
            .with_attachment(0, vec![payload]);
        let (addr, _) = mgr.write_undo_redo(redo_record, page_prev, UndoPointer::NULL).unwrap();
        addr
    }

    #[test]
    fn needs_rollback_is_false_once_page_predates_the_snapshot() {
        let mgr = manager();
        let dispatch = UndoDispatchTable::new();
        let engine = RollbackEngine::new(&mgr, &dispatch);
        let txn = Transaction::new(5, snapshot_seeing_nobody(1), UndoPointer { lsn: 100, ..UndoPointer::NULL });
        let header = PageHeader { page_lsn: 1, page_undo_nxt_lsn: UndoPointer { lsn: 50, ..UndoPointer::NULL }, page_first_lsn: 1 };
        assert!(!engine.needs_rollback(&txn, &header));
    }

    #[test]
    fn rollback_undoes_updates_invisible_to_the_snapshot() {
        let mgr = manager();
        let applied = Arc::new(AtomicU64::new(0));
        let applied2 = applied.clone();
        let mut dispatch = UndoDispatchTable::new();
        dispatch.register(
            1,
            Arc::new(move |rec, frame: &mut [u8]| {
                applied2.fetch_add(1, Ordering::SeqCst);
                frame[0] = rec.redo.attachments[0].bytes[0];
                Ok(())
            }) as UndoCallback,
        );
        let engine = RollbackEngine::new(&mgr, &dispatch);

        // Transaction 1 commits an update at some low LSN (visible to everyone).
        let addr1 = write_update(&mgr, 1, UndoPointer::NULL, 0xAA);
        // Transaction 2 begins after that (commit_lsn = addr1.lsn), then updates the page.
        let addr2 = write_update(&mgr, 2, addr1, 0xBB);

        let mut snap = snapshot_seeing_nobody(1);
        // Mark transaction 1 committed within the snapshot window.
        snap.bits[0] |= 1;
        let txn = Transaction::new(3, snap, UndoPointer { lsn: addr1.lsn, ..UndoPointer::NULL });

        let mut header = PageHeader { page_lsn: addr2.lsn, page_undo_nxt_lsn: addr2, page_first_lsn: addr1.lsn };
        let mut frame = vec![0u8; 16];
        assert!(engine.needs_rollback(&txn, &header));
        engine.rollback(&txn, &mut frame, &mut header, 0).unwrap();

        // Transaction 2's update was invisible and got undone (callback ran once).
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert_eq!(frame[0], 0xBB);
        // A repeat rollback on the same frame is now a no-op.
        let calls_before = applied.load(Ordering::SeqCst);
        engine.rollback(&txn, &mut frame, &mut header, 0).unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), calls_before);
    }

    #[test]
    fn clr_entries_suppress_the_pair_they_compensate() {
        let mgr = manager();
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        let mut dispatch = UndoDispatchTable::new();
        dispatch.register(1, Arc::new(move |_rec, _frame: &mut [u8]| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }) as UndoCallback);
        let engine = RollbackEngine::new(&mgr, &dispatch);

        // Transaction 2 updates the page, then rolls its own change back by
        // writing a CLR whose undoNxtLSN points back past that update.
        let addr_update = write_update(&mgr, 2, UndoPointer::NULL, 0xCC);
        let clr_redo = RedoLogRecord::new(RecordType::Clr, 2, PageId::new(0, 1), PageId::new(0, 1), 1, 1);
        let mut clr_redo = clr_redo;
        clr_redo.undo_nxt_lsn = UndoPointer::NULL; // jumps below the update, suppressing it
        let (addr_clr, _) = mgr.write_undo_redo(clr_redo, addr_update, UndoPointer::NULL).unwrap();

        let snap = snapshot_seeing_nobody(1);
        let txn = Transaction::new(9, snap, UndoPointer::NULL);
        let mut header = PageHeader { page_lsn: addr_clr.lsn, page_undo_nxt_lsn: addr_clr, page_first_lsn: addr_update.lsn };
        let mut frame = vec![0u8; 16];
        engine.rollback(&txn, &mut frame, &mut header, 0).unwrap();

        // The CLR itself is never dispatched (rec_type is handled specially)
        // and it suppressed the update it compensates for.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
