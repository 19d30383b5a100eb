use crate::ids::{Lsn, TransId, UndoPointer};

/// A transaction's private view of which other transactions were committed
/// at the moment it began — a copy of the master `CommitList`, frozen.
///
/// A transaction U is visible to the holder of this snapshot iff
/// `U.trans_id < base_trans_id + bits.len()*64` and the corresponding bit
/// is set, OR `U.trans_id < base_trans_id` (anything truncated off the
/// front of the master list was committed long enough ago to have been
/// slid out of the window).
#[derive(Clone, Debug, Default)]
pub struct CommitListSnapshot {
    pub base_trans_id: TransId,
    pub bits: Vec<u64>,
    /// The earliest known commit LSN across all live transactions as of
    /// snapshot time — the transaction's MVCC horizon.
    pub earliest_commit_lsn: UndoPointer,
    pub commit_trans_id: TransId,
}

impl CommitListSnapshot {
    pub fn is_committed(&self, trans_id: TransId) -> bool {
        if trans_id < self.base_trans_id {
            return true;
        }
        let offset = (trans_id - self.base_trans_id) as usize;
        let word = offset / 64;
        let bit = offset % 64;
        match self.bits.get(word) {
            Some(w) => (w >> bit) & 1 == 1,
            None => false,
        }
    }
}

/// A live transaction's state as tracked by the transaction pool.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub trans_id: TransId,
    pub commit_list: CommitListSnapshot,
    /// This transaction's first write's own redo address — the floor below
    /// which the redo log's firewall must not advance while it is active.
    pub first_redo_lsn: Lsn,
    /// This transaction's first write's own undo address — the floor below
    /// which the undo log must not be garbage-collected while it is active.
    pub first_undo_addr: UndoPointer,
    /// Pointer to the most recent undo record written by this transaction.
    pub undo_nxt_lsn: UndoPointer,
    /// The oldest undo LSN that might need to be consulted to reconstruct
    /// this transaction's view — the MVCC snapshot point.
    pub commit_lsn: UndoPointer,
    /// Incremented on every undo record this transaction causes to be
    /// written; used by the deadlock detector to pick a cheap victim.
    pub rollback_cost: u64,
    pub is_committed: bool,
    pub is_serializable: bool,
    pub is_cancelled: bool,
    pub has_waiters: bool,
}

impl Transaction {
    pub fn new(trans_id: TransId, commit_list: CommitListSnapshot, commit_lsn: UndoPointer) -> Self {
        Self {
            trans_id,
            commit_list,
            first_redo_lsn: 0,
            first_undo_addr: UndoPointer::NULL,
            undo_nxt_lsn: UndoPointer::NULL,
            commit_lsn,
            rollback_cost: 0,
            is_committed: false,
            is_serializable: false,
            is_cancelled: false,
            has_waiters: false,
        }
    }

    /// A lightweight, Clone-able snapshot of externally-visible fields,
    /// taken under a lock that also blocks log-write progress for this
    /// transaction — per §4.6, `getActiveTransactions` must see durable
    /// state.
    pub fn active_snapshot(&self) -> ActiveTransactionInfo {
        ActiveTransactionInfo {
            trans_id: self.trans_id,
            first_redo_lsn: self.first_redo_lsn,
            first_undo_addr: self.first_undo_addr,
            undo_nxt_lsn: self.undo_nxt_lsn,
            rollback_cost: self.rollback_cost,
            is_committed: self.is_committed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveTransactionInfo {
    pub trans_id: TransId,
    pub first_redo_lsn: Lsn,
    pub first_undo_addr: UndoPointer,
    pub undo_nxt_lsn: UndoPointer,
    pub rollback_cost: u64,
    pub is_committed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sees_committed_bit_within_window() {
        let snap = CommitListSnapshot {
            base_trans_id: 10,
            bits: vec![0b0000_0101], // txns 10 and 12 committed
            earliest_commit_lsn: UndoPointer::NULL,
            commit_trans_id: 10,
        };
        assert!(snap.is_committed(10));
        assert!(!snap.is_committed(11));
        assert!(snap.is_committed(12));
        assert!(!snap.is_committed(13));
    }

    #[test]
    fn snapshot_treats_anything_below_base_as_committed() {
        let snap = CommitListSnapshot {
            base_trans_id: 10,
            bits: vec![0],
            earliest_commit_lsn: UndoPointer::NULL,
            commit_trans_id: 10,
        };
        assert!(snap.is_committed(3));
    }
}
