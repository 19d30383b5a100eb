use serde::{Deserialize, Serialize};

use crate::ids::{Lsn, PageId, TransId, UndoPointer};

/// Redo-record type tag, persisted as a single byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Update = 0,
    Clr = 1,
    BeginCheckpoint = 2,
    EndCheckpoint = 3,
    Commit = 4,
}

impl RecordType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Update),
            1 => Some(Self::Clr),
            2 => Some(Self::BeginCheckpoint),
            3 => Some(Self::EndCheckpoint),
            4 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// One variable-length attachment entry: an opaque byte flag plus payload.
/// Access methods use the flag to tag "before image" vs "after image" vs
/// other record-specific sub-payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub flag: u8,
    pub bytes: Vec<u8>,
}

/// The unit written to the redo log.
///
/// `lsn` is left at 0 by the producer and assigned by the writer at append
/// time; everything else is caller-supplied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedoLogRecord {
    pub lsn: Lsn,
    pub rec_type: RecordType,
    pub trans_id: TransId,
    pub segment_id: PageId,
    pub page_id: PageId,
    pub segment_type: u8,
    pub page_type: u8,
    /// For CLRs: the undo record this compensation nullifies. Zero/NULL
    /// otherwise.
    pub undo_nxt_lsn: UndoPointer,
    pub attachments: Vec<Attachment>,
}

impl RedoLogRecord {
    pub fn new(
        rec_type: RecordType,
        trans_id: TransId,
        segment_id: PageId,
        page_id: PageId,
        segment_type: u8,
        page_type: u8,
    ) -> Self {
        Self {
            lsn: 0,
            rec_type,
            trans_id,
            segment_id,
            page_id,
            segment_type,
            page_type,
            undo_nxt_lsn: UndoPointer::NULL,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, flag: u8, bytes: Vec<u8>) -> Self {
        self.attachments.push(Attachment { flag, bytes });
        self
    }
}

/// The unit written to the undo log: a `RedoLogRecord` plus the fields
/// that only make sense for a backward-recovery record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLogRecord {
    pub redo: RedoLogRecord,
    /// This record's own address. Assigned by the undo log writer at write
    /// time; `NULL` beforehand.
    pub address: UndoPointer,
    /// The previous undo record for the same page (forms the page's undo
    /// chain, anchored at the page header's `pageUndoNxtLSN`).
    pub page_undo_nxt_lsn: UndoPointer,
    /// The previous undo record written by the same transaction (forms the
    /// transaction's own undo chain, anchored at `Transaction.undoNxtLSN`).
    /// Walked by live-transaction abort and by recovery's loser undo pass,
    /// as opposed to `page_undo_nxt_lsn`, which MVCC reconstruction walks.
    pub trans_prev_lsn: UndoPointer,
}

impl UndoLogRecord {
    pub fn new(redo: RedoLogRecord, page_undo_nxt_lsn: UndoPointer, trans_prev_lsn: UndoPointer) -> Self {
        Self { redo, address: UndoPointer::NULL, page_undo_nxt_lsn, trans_prev_lsn }
    }

    pub fn trans_id(&self) -> TransId {
        self.redo.trans_id
    }

    pub fn is_clr(&self) -> bool {
        self.redo.rec_type == RecordType::Clr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_roundtrips_through_byte() {
        for t in [
            RecordType::Update,
            RecordType::Clr,
            RecordType::BeginCheckpoint,
            RecordType::EndCheckpoint,
            RecordType::Commit,
        ] {
            assert_eq!(RecordType::from_byte(t as u8), Some(t));
        }
        assert_eq!(RecordType::from_byte(200), None);
    }

    #[test]
    fn undo_record_carries_own_address_and_page_chain() {
        let redo = RedoLogRecord::new(
            RecordType::Update,
            1,
            PageId::new(0, 1),
            PageId::new(0, 1),
            1,
            1,
        );
        let undo = UndoLogRecord::new(redo, UndoPointer::NULL, UndoPointer::NULL);
        assert!(undo.address.is_null());
        assert!(!undo.is_clr());
    }
}
