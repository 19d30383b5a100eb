use std::collections::{HashMap, HashSet};

use cooldb_buffer::{Affinity, LockMode};
use cooldb_common::{CoreResult, Lsn, PageHeader, RecordType, RedoLogRecord, TransId, UndoPointer, PAGE_HEADER_SIZE};
use cooldb_redolog::RedoLogReader;
use tracing::{debug, info, warn};

use crate::core::Core;

/// One decoded redo record plus the logical address it was assigned.
struct ScannedRecord {
    lsn: Lsn,
    record: RedoLogRecord,
}

/// Everything the forward pass over the redo log determines by itself,
/// before the buffer pool or transaction pool exist to drive the redo and
/// undo passes proper.
pub(crate) struct RecoveryScan {
    records: Vec<ScannedRecord>,
    committed: HashSet<TransId>,
    max_trans_id: TransId,
    pub(crate) end_of_log: Lsn,
}

/// Scans the redo log forward from its start, decoding every well-formed
/// record in order. A read error — a corrupted indicator, or simply the
/// EOL marker written just past the last record before the crash — ends
/// the scan cleanly: per the class-2 error guidance, an unwritten or
/// partially-written tail is expected at the true end of the log, not a
/// failure to report.
pub(crate) fn scan_redo_log(reader: &mut RedoLogReader, capacity: u64) -> RecoveryScan {
    let mut records = Vec::new();
    let mut committed = HashSet::new();
    let mut max_trans_id: TransId = 0;
    // Zero is reserved, so an empty log's logical end is 1, matching the
    // address the writer assigns its very first record.
    let mut end_of_log: Lsn = 1;

    // The scan's real stopping condition is the first decode error (the
    // unwritten tail); this bound only guards against looping forever if
    // the file is corrupt in a way that never produces one.
    let bound = capacity.saturating_mul(4).max(1);
    for item in reader.iter_from(1, bound) {
        let (lsn, body) = match item {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, "forward scan stopped at the log's unwritten tail");
                break;
            }
        };
        let mut record = match cooldb_logmgr::decode(&body) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "forward scan stopped on an undecodable record");
                break;
            }
        };
        record.lsn = lsn;
        end_of_log = lsn + 3 + body.len() as u64;

        if record.trans_id > max_trans_id {
            max_trans_id = record.trans_id;
        }
        if record.rec_type == RecordType::Commit {
            committed.insert(record.trans_id);
        }
        records.push(ScannedRecord { lsn, record });
    }

    RecoveryScan { records, committed, max_trans_id, end_of_log }
}

/// Runs the two recovery passes over an already-scanned log: forward redo
/// (reapplying every durable update whose page wasn't already at least
/// that current), then backward undo of every transaction that never
/// wrote a COMMIT record — the "losers".
pub(crate) fn recover(core: &Core, scan: RecoveryScan) -> CoreResult<()> {
    for scanned in &scan.records {
        if matches!(scanned.record.rec_type, RecordType::Update | RecordType::Clr) {
            apply_redo(core, scanned)?;
        }
    }

    let last_undo = resolve_last_undo(core, &scan)?;
    let mut losers = 0;
    for (&trans_id, &undo_head) in &last_undo {
        if scan.committed.contains(&trans_id) {
            continue;
        }
        warn!(trans_id, "recovering: rolling back transaction that never committed");
        core.undo_transaction_chain(trans_id, undo_head)?;
        losers += 1;
    }
    info!(
        records = scan.records.len(),
        committed = scan.committed.len(),
        losers,
        "recovery passes complete"
    );

    core.txns().fast_forward_next_trans_id(scan.max_trans_id + 1);
    Ok(())
}

/// For each transaction, the address backward-undo should resume from: the
/// most recent Update's own undo address, or — if the most recent thing
/// logged for it is a CLR — the ceiling that CLR recorded, so a crash
/// partway through a previous abort never re-compensates an update that
/// was already undone.
fn resolve_last_undo(core: &Core, scan: &RecoveryScan) -> CoreResult<HashMap<TransId, UndoPointer>> {
    let mut last_undo = HashMap::new();
    for scanned in &scan.records {
        match scanned.record.rec_type {
            RecordType::Update => {
                last_undo.insert(scanned.record.trans_id, scanned.record.undo_nxt_lsn);
            }
            RecordType::Clr => {
                let undo_rec = core.log().read_undo(scanned.record.undo_nxt_lsn)?;
                last_undo.insert(scanned.record.trans_id, undo_rec.redo.undo_nxt_lsn);
            }
            _ => {}
        }
    }
    Ok(last_undo)
}

/// Applies one record's after-image to its page, gated on `page_lsn`: a
/// page already at or past this record's LSN already reflects it (it was
/// flushed to disk before the crash), so re-applying it would be wrong.
fn apply_redo(core: &Core, scanned: &ScannedRecord) -> CoreResult<()> {
    let page = scanned.record.page_id;
    if page.is_null() {
        return Ok(());
    }
    let token = core.buffer().pin(page, LockMode::Exclusive)?;
    core.buffer().with_frame(token, |data| {
        let mut header = PageHeader::read_from(data);
        if header.page_lsn >= scanned.lsn {
            return;
        }
        for attachment in &scanned.record.attachments {
            if attachment.flag == 0 {
                let end = (PAGE_HEADER_SIZE + attachment.bytes.len()).min(data.len());
                data[PAGE_HEADER_SIZE..end].copy_from_slice(&attachment.bytes[..end - PAGE_HEADER_SIZE]);
            }
        }
        header.page_lsn = scanned.lsn;
        if !scanned.record.undo_nxt_lsn.is_null() {
            header.page_undo_nxt_lsn = scanned.record.undo_nxt_lsn;
        }
        header.write_into(data);
    })?;
    core.buffer().unpin_dirty(token, Affinity::None, scanned.lsn)?;
    Ok(())
}
