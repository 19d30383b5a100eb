use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cooldb_buffer::{Affinity, BackgroundWriter, BufferPool, LockMode, PinToken};
use cooldb_common::{
    CoreConfig, CoreError, CoreResult, Lsn, PageHeader, PageId, RecordType, RedoLogRecord, TransId, UndoCallback,
    UndoDispatchTable, UndoPointer, PAGE_HEADER_SIZE,
};
use cooldb_logmgr::LogManager;
use cooldb_mvcc::RollbackEngine;
use cooldb_redolog::{RedoLogReader, RedoLogWriter};
use cooldb_txn::TransactionPool;
use cooldb_undolog::UndoLogWriter;
use tracing::{debug, info, warn};

use crate::recovery::recover;

pub(crate) const DATA_FILE_ID: i32 = 0;
const PIN_RETRY_BUDGET: u32 = 5_000;
const PIN_RETRY_DELAY: Duration = Duration::from_millis(2);

/// The single entry point external collaborators (access methods) depend
/// on: the buffer pool, the dual-log manager, the transaction pool and
/// deadlock detector, and the MVCC rollback engine, wired into one facade.
///
/// `Core` owns every subsystem strictly: dropping it stops the background
/// writer first, the same "stop the background worker before tearing down
/// its owner" shape the buffer crate's own writer uses.
pub struct Core {
    config: CoreConfig,
    buffer: Arc<BufferPool>,
    log: Arc<LogManager>,
    txns: Arc<TransactionPool>,
    dispatch: Mutex<UndoDispatchTable>,
    writer: Option<BackgroundWriter>,
    /// Approximates per-page exclusive lock ownership for the deadlock
    /// detector: the buffer pool's frame table tracks pin mode but not
    /// "which transaction holds it", so `Core` keeps that side mapping
    /// itself, updated on every successful exclusive pin/unpin pair.
    exclusive_holders: Mutex<HashMap<PageId, TransId>>,
}

impl Core {
    fn assemble(config: CoreConfig, file_manager: cooldb_buffer::FileManager, log: LogManager, dispatch: UndoDispatchTable) -> Self {
        let log = Arc::new(log);
        let txns = Arc::new(TransactionPool::new());
        let buffer = Arc::new(BufferPool::with_commit_checker(
            file_manager,
            config.pool_capacity as usize,
            config.pool_max_capacity(),
            config.page_size as usize,
            config.dirty_ratio_permille,
            log.clone(),
            txns.clone(),
        ));
        let gc_txns = txns.clone();
        let gc_log = log.clone();
        let writer = BackgroundWriter::spawn_with_hook(
            buffer.clone(),
            Duration::from_secs(config.checkpoint_interval_secs),
            Some(Arc::new(move || truncate_logs(&gc_txns, &gc_log))),
        );
        Self {
            config,
            buffer,
            log,
            txns,
            dispatch: Mutex::new(dispatch),
            writer: Some(writer),
            exclusive_holders: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a brand-new, empty database over the given files. `dispatch`
    /// must already carry every access method's undo callback — access
    /// methods register at construction time, not afterward, since `open`
    /// (below) needs the full table available the moment recovery runs.
    pub fn create(config: CoreConfig, data_file: File, redo_file: File, undo_file: File, dispatch: UndoDispatchTable) -> CoreResult<Self> {
        let mut file_manager = cooldb_buffer::FileManager::new(config.page_size as usize);
        file_manager.add(DATA_FILE_ID, data_file);
        let redo = RedoLogWriter::create(redo_file, config.redo_log_capacity_bytes);
        let undo = UndoLogWriter::create(undo_file, config.page_size as usize, config.undo_extent_pages)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let log = LogManager::new(redo, undo);
        info!("cooldb core created fresh");
        Ok(Self::assemble(config, file_manager, log, dispatch))
    }

    /// Reopens an existing database, running the ARIES-style forward
    /// redo/analysis pass and the backward undo pass over any transaction
    /// that never wrote a COMMIT record before recovering. `dispatch` must
    /// already hold every access method's undo callback: the loser-undo
    /// pass below dispatches through it before this call returns, so
    /// there is no later point at which `register_undo_callback` could
    /// still run in time.
    pub fn open(config: CoreConfig, data_file: File, redo_file: File, undo_file: File, dispatch: UndoDispatchTable) -> CoreResult<Self> {
        let mut file_manager = cooldb_buffer::FileManager::new(config.page_size as usize);
        file_manager.add(DATA_FILE_ID, data_file);

        let mut scan_reader = RedoLogReader::open(redo_file.try_clone()?, config.redo_log_capacity_bytes);
        let scan = crate::recovery::scan_redo_log(&mut scan_reader, config.redo_log_capacity_bytes);

        let redo = RedoLogWriter::resume(redo_file, config.redo_log_capacity_bytes, scan.end_of_log);
        let undo = UndoLogWriter::open(undo_file, config.page_size as usize)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let log = LogManager::new(redo, undo);

        let core = Self::assemble(config, file_manager, log, dispatch);
        recover(&core, scan)?;
        info!("cooldb core recovered and reopened");
        Ok(core)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Registers an access method's undo callback after construction.
    /// Only safe to rely on for transactions begun after this call — any
    /// crash recovery already ran during `open` using whatever `dispatch`
    /// was handed to it.
    pub fn register_undo_callback(&self, segment_type: u8, callback: UndoCallback) {
        self.dispatch.lock().unwrap().register(segment_type, callback);
    }

    // ---- buffer pool surface -------------------------------------------

    /// Pins `page` in `mode` on behalf of `trans_id`, registering a
    /// deadlock-detector wait edge and retrying if another transaction
    /// currently holds a conflicting exclusive pin. A cancelled waiter
    /// (chosen as a deadlock victim) gives up immediately rather than
    /// blocking forever on a lock it will never be granted.
    pub fn pin(&self, trans_id: TransId, page: PageId, mode: LockMode) -> CoreResult<PinToken> {
        for _ in 0..PIN_RETRY_BUDGET {
            if let Some(token) = self.buffer.try_pin(page, mode)? {
                self.txns.clear_wait(trans_id);
                if mode == LockMode::Exclusive {
                    self.exclusive_holders.lock().unwrap().insert(page, trans_id);
                }
                return Ok(token);
            }
            if self.txns.is_cancelled(trans_id) {
                return Err(CoreError::TransactionCancelled(trans_id));
            }
            let holder = self.exclusive_holders.lock().unwrap().get(&page).copied();
            if let Some(holder) = holder {
                if holder != trans_id {
                    self.txns.wait_for(trans_id, holder)?;
                }
            }
            std::thread::sleep(PIN_RETRY_DELAY);
        }
        Err(CoreError::Interrupted)
    }

    pub fn pin_new(&self, trans_id: TransId, page: PageId) -> CoreResult<PinToken> {
        let token = self.buffer.pin_new(page)?;
        self.exclusive_holders.lock().unwrap().insert(page, trans_id);
        Ok(token)
    }

    pub fn pin_temp(&self, trans_id: TransId, page: PageId) -> CoreResult<PinToken> {
        self.buffer.pin_temp(page, trans_id)
    }

    pub fn pin_version(&self, page: PageId, trans_id: TransId, version: u64) -> CoreResult<PinToken> {
        self.buffer.pin_version(page, trans_id, version)
    }

    pub fn un_pin(&self, trans_id: TransId, page: PageId, token: PinToken, affinity: Affinity) -> CoreResult<()> {
        self.release_exclusive(page, trans_id);
        self.buffer.unpin(token, affinity)
    }

    pub fn un_pin_dirty(
        &self,
        trans_id: TransId,
        page: PageId,
        token: PinToken,
        affinity: Affinity,
        end_lsn: Lsn,
    ) -> CoreResult<()> {
        self.release_exclusive(page, trans_id);
        self.buffer.unpin_dirty(token, affinity, end_lsn)
    }

    fn release_exclusive(&self, page: PageId, trans_id: TransId) {
        let mut holders = self.exclusive_holders.lock().unwrap();
        if holders.get(&page) == Some(&trans_id) {
            holders.remove(&page);
        }
    }

    pub fn with_frame<R>(&self, token: PinToken, f: impl FnOnce(&mut [u8]) -> R) -> CoreResult<R> {
        self.buffer.with_frame(token, f)
    }

    pub fn check_point(&self) -> CoreResult<usize> {
        let still_dirty = self.buffer.check_point()?.len();
        truncate_logs(&self.txns, &self.log);
        Ok(still_dirty)
    }

    // ---- log surface ----------------------------------------------------

    /// Writes the undo record, threads it onto both the page's undo chain
    /// and this transaction's own undo chain, then writes the paired redo
    /// record. Callers are expected to stamp the page header's `page_lsn`
    /// and `page_undo_nxt_lsn` from the returned values themselves, since
    /// only the caller knows the page's current in-memory header.
    pub fn write_undo_redo(
        &self,
        trans_id: TransId,
        redo_record: RedoLogRecord,
        page_undo_nxt_lsn: UndoPointer,
    ) -> CoreResult<(UndoPointer, Lsn)> {
        let trans_prev_lsn = self.txns.undo_nxt_lsn(trans_id);
        let (undo_addr, redo_lsn) = self.log.write_undo_redo(redo_record, page_undo_nxt_lsn, trans_prev_lsn)?;
        self.txns.set_undo_nxt_lsn(trans_id, undo_addr, redo_lsn);
        self.txns.record_rollback_cost(trans_id, 1);
        Ok((undo_addr, redo_lsn))
    }

    pub fn write_redo(&self, redo_record: &RedoLogRecord) -> CoreResult<Lsn> {
        Ok(self.log.write_redo(redo_record)?)
    }

    // ---- transaction lifecycle ------------------------------------------

    pub fn begin_transaction(&self) -> CoreResult<TransId> {
        self.txns.begin_transaction()
    }

    /// Writes a COMMIT redo record, flushes the redo log through it — per
    /// the ordering guarantee, once `flushTo` returns, every undo and redo
    /// record this transaction wrote is durable — then marks it committed.
    pub fn commit(&self, trans_id: TransId) -> CoreResult<Lsn> {
        let commit_record = RedoLogRecord::new(RecordType::Commit, trans_id, PageId::NULL, PageId::NULL, 0, 0);
        let commit_lsn = self.write_redo(&commit_record)?;
        self.log.flush_to(commit_lsn)?;
        self.txns.commit(trans_id, UndoPointer { lsn: commit_lsn, ..UndoPointer::NULL })?;
        debug!(trans_id, commit_lsn, "transaction committed");
        Ok(commit_lsn)
    }

    /// Aborts a live transaction: walks its own undo chain backward,
    /// compensating every update via the registered undo callback and
    /// writing a CLR for each one so the abort is idempotent if it is
    /// interrupted by a crash partway through.
    pub fn rollback(&self, trans_id: TransId) -> CoreResult<()> {
        let start = self.txns.undo_nxt_lsn(trans_id);
        self.undo_transaction_chain(trans_id, start)?;
        self.txns.forget(trans_id);
        Ok(())
    }

    /// Shared by live-transaction abort and recovery's loser-undo pass:
    /// walks backward from `next` along the transaction's own undo chain
    /// (`trans_prev_lsn`), compensating each update in place and emitting
    /// a CLR that both records the compensation in the redo log and links
    /// onto the affected page's own undo chain, so a second crash mid-abort
    /// resumes correctly instead of re-applying an already-compensated
    /// update.
    pub(crate) fn undo_transaction_chain(&self, trans_id: TransId, mut next: UndoPointer) -> CoreResult<()> {
        while !next.is_null() {
            let undo_rec = self.log.read_undo(next)?;
            let page = undo_rec.redo.page_id;

            let token = self.buffer.pin(page, LockMode::Exclusive)?;
            self.buffer.with_frame(token, |data| -> CoreResult<()> {
                let (_meta, body) = data.split_at_mut(PAGE_HEADER_SIZE);
                self.dispatch.lock().unwrap().dispatch(&undo_rec, body)
            })??;

            let mut clr = RedoLogRecord::new(
                RecordType::Clr,
                trans_id,
                undo_rec.redo.segment_id,
                page,
                undo_rec.redo.segment_type,
                undo_rec.redo.page_type,
            );
            // The jump target a later MVCC walk should treat as "already
            // undone up to here" for this transaction on this page.
            clr.undo_nxt_lsn = undo_rec.page_undo_nxt_lsn;
            let (clr_undo_addr, clr_lsn) = self.log.write_undo_redo(clr, undo_rec.page_undo_nxt_lsn, UndoPointer::NULL)?;

            self.buffer.with_frame(token, |data| {
                let mut header = PageHeader::read_from(data);
                header.page_lsn = clr_lsn;
                header.page_undo_nxt_lsn = clr_undo_addr;
                header.write_into(data);
            })?;
            self.buffer.unpin_dirty(token, Affinity::None, clr_lsn)?;

            next = undo_rec.trans_prev_lsn;
        }
        Ok(())
    }

    // ---- MVCC -------------------------------------------------------------

    /// Reconstructs `page`'s historical version inside the pinned frame for
    /// `trans_id`'s snapshot, iff the page's undo chain carries updates
    /// invisible to it.
    pub fn reconstruct_for_read(&self, trans_id: TransId, token: PinToken, cusp: Lsn) -> CoreResult<()> {
        let txn = self
            .txns
            .snapshot_of(trans_id)
            .ok_or(CoreError::TransactionCancelled(trans_id))?;
        let dispatch = self.dispatch.lock().unwrap();
        let engine = RollbackEngine::new(&self.log, &dispatch);
        self.buffer.with_frame(token, |data| -> CoreResult<()> {
            let mut header = PageHeader::read_from(data);
            if engine.needs_rollback(&txn, &header) {
                let (_meta, body) = data.split_at_mut(PAGE_HEADER_SIZE);
                engine.rollback(&txn, body, &mut header, cusp)?;
                header.write_into(data);
            }
            Ok(())
        })?
    }

    pub(crate) fn buffer(&self) -> &BufferPool {
        &self.buffer
    }

    pub(crate) fn log(&self) -> &LogManager {
        &self.log
    }

    pub(crate) fn txns(&self) -> &TransactionPool {
        &self.txns
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.stop();
        }
    }
}

/// Advances the redo firewall and reclaims undo extents behind whichever
/// active transaction started furthest back, the floor below which
/// `getActiveTransactions` says nothing can safely be discarded. A no-op
/// while every live transaction's floor is still unset (no writes yet).
fn truncate_logs(txns: &TransactionPool, log: &LogManager) {
    let actives = txns.active_transactions();

    let redo_floor = actives
        .iter()
        .filter(|t| !t.is_committed && t.first_redo_lsn > 0)
        .map(|t| t.first_redo_lsn)
        .min();
    if let Some(floor) = redo_floor {
        log.move_firewall_to(floor);
    }

    let undo_floor = actives
        .iter()
        .filter(|t| !t.is_committed && !t.first_undo_addr.is_null())
        .min_by_key(|t| t.first_undo_addr.lsn)
        .map(|t| t.first_undo_addr);
    if let Some(floor) = undo_floor {
        if let Err(e) = log.gc_undo_to(floor) {
            warn!(error = %e, "undo log truncation failed");
        }
    }
}
