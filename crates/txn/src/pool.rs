use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use cooldb_buffer::CommitChecker;
use cooldb_common::{ActiveTransactionInfo, CoreError, CoreResult, Lsn, MasterCommitList, Transaction, TransId, UndoPointer};
use tracing::{debug, info};

struct Inner {
    transactions: HashMap<TransId, Transaction>,
    next_trans_id: TransId,
    commit_list: MasterCommitList,
    /// Single-valued waits-for graph: each waiter blocks behind at most one
    /// holder at a time, matching the buffer pool's one-conflict-at-a-time
    /// pin wait.
    waits_for: HashMap<TransId, TransId>,
    quiescing: bool,
}

impl Inner {
    /// The oldest commit point any still-active transaction might need to
    /// read back to — a new transaction's MVCC snapshot horizon.
    fn earliest_commit_lsn(&self) -> UndoPointer {
        self.transactions
            .values()
            .filter(|t| !t.is_committed)
            .map(|t| t.commit_lsn)
            .filter(|p| !p.is_null())
            .min()
            .unwrap_or(UndoPointer::NULL)
    }
}

/// Tracks every live transaction, the master commit-status bitset, and the
/// waits-for graph used for deadlock detection.
///
/// The buffer pool consults this pool through `CommitChecker` to decide
/// whether a `pinTemp` frame can be discarded instead of flushed; the root
/// facade consults it for snapshots, commit/rollback bookkeeping, and lock
/// wait registration.
pub struct TransactionPool {
    inner: Mutex<Inner>,
    activity: Condvar,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                transactions: HashMap::new(),
                next_trans_id: 1,
                commit_list: MasterCommitList::new(1),
                waits_for: HashMap::new(),
                quiescing: false,
            }),
            activity: Condvar::new(),
        }
    }

    /// Blocks while the pool is quiescing, then allocates a new transaction
    /// id, enlists it in the master commit list, and freezes a snapshot of
    /// currently-committed transactions for its MVCC reads.
    pub fn begin_transaction(&self) -> CoreResult<TransId> {
        let mut inner = self.inner.lock().unwrap();
        while inner.quiescing {
            inner = self.activity.wait(inner).unwrap();
        }
        let trans_id = inner.next_trans_id;
        inner.next_trans_id += 1;
        inner.commit_list.enlist(trans_id);
        let earliest = inner.earliest_commit_lsn();
        let snapshot = inner.commit_list.snapshot(earliest, trans_id);
        inner.transactions.insert(trans_id, Transaction::new(trans_id, snapshot, earliest));
        debug!(trans_id, "transaction begun");
        Ok(trans_id)
    }

    /// Marks the transaction committed in the master list, slides the
    /// window past any now-fully-committed leading run, drops any waits-for
    /// edges pointing at it (its locks are about to be released), and wakes
    /// waiters.
    pub fn commit(&self, trans_id: TransId, commit_lsn: UndoPointer) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        {
            let txn = inner.transactions.get_mut(&trans_id).ok_or(CoreError::TransactionCancelled(trans_id))?;
            txn.commit_lsn = commit_lsn;
            txn.is_committed = true;
        }
        inner.commit_list.mark_committed(trans_id);
        inner.commit_list.slide();
        inner.waits_for.retain(|_, holder| *holder != trans_id);
        inner.transactions.remove(&trans_id);
        debug!(trans_id, "transaction committed");
        drop(inner);
        self.activity.notify_all();
        Ok(())
    }

    /// Drops a rolled-back transaction's bookkeeping entirely: it never
    /// becomes visible to any snapshot taken after this point, the same as
    /// a transaction that never ran.
    pub fn forget(&self, trans_id: TransId) {
        let mut inner = self.inner.lock().unwrap();
        inner.transactions.remove(&trans_id);
        inner.waits_for.retain(|waiter, holder| *waiter != trans_id && *holder != trans_id);
        drop(inner);
        self.activity.notify_all();
    }

    pub fn is_cancelled(&self, trans_id: TransId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.transactions.get(&trans_id).map(|t| t.is_cancelled).unwrap_or(false)
    }

    /// Adds to a transaction's rollback-cost counter, the figure the
    /// deadlock detector uses to pick the cheapest victim. Callers bump
    /// this once per undo record the transaction causes to be written.
    pub fn record_rollback_cost(&self, trans_id: TransId, extra: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transactions.get_mut(&trans_id) {
            t.rollback_cost += extra;
        }
    }

    pub fn set_undo_nxt_lsn(&self, trans_id: TransId, address: UndoPointer, redo_lsn: Lsn) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transactions.get_mut(&trans_id) {
            t.undo_nxt_lsn = address;
            if t.first_undo_addr.is_null() {
                t.first_undo_addr = address;
                t.first_redo_lsn = redo_lsn;
            }
        }
    }

    pub fn active_transactions(&self) -> Vec<ActiveTransactionInfo> {
        let inner = self.inner.lock().unwrap();
        inner.transactions.values().map(Transaction::active_snapshot).collect()
    }

    /// The transaction's own undo-chain head — the address `rollback`
    /// should start walking from to reverse this transaction's updates.
    pub fn undo_nxt_lsn(&self, trans_id: TransId) -> UndoPointer {
        self.inner.lock().unwrap().transactions.get(&trans_id).map(|t| t.undo_nxt_lsn).unwrap_or(UndoPointer::NULL)
    }

    /// A clone of a live transaction's bookkeeping, for MVCC reconstruction
    /// callers that need its commit-list snapshot and commit LSN without
    /// holding the pool's lock for the duration of a page reconstruction.
    pub fn snapshot_of(&self, trans_id: TransId) -> Option<Transaction> {
        self.inner.lock().unwrap().transactions.get(&trans_id).cloned()
    }

    /// Resyncs the id allocator after a recovery scan has determined the
    /// highest transaction id that ever appeared in the log — used once,
    /// right after `Core::open`'s forward pass, so ids never get reused.
    pub fn fast_forward_next_trans_id(&self, at_least: TransId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.next_trans_id < at_least {
            inner.next_trans_id = at_least;
        }
    }

    /// Registers that `waiter` is blocked behind `holder` — e.g. the buffer
    /// pool's pin conflicted with a lock mode `holder` already owns — and
    /// runs cycle detection over the waits-for graph.
    ///
    /// If this edge closes a cycle, the cheapest-to-roll-back transaction on
    /// the cycle is marked cancelled and its outgoing edge is removed so the
    /// cycle is actually broken. If the cancelled transaction turns out to
    /// be `waiter` itself, an error is returned immediately: `waiter` can
    /// never be granted the resource it asked for and must abort instead of
    /// blocking. Otherwise the caller is free to block on the resource
    /// through whatever mechanism owns it (the buffer pool's own condvar);
    /// that wait resolves naturally once the victim rolls back and releases
    /// its lock.
    pub fn wait_for(&self, waiter: TransId, holder: TransId) -> CoreResult<()> {
        if waiter == holder {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        inner.waits_for.insert(waiter, holder);

        let mut cycle = vec![waiter];
        let mut cur = holder;
        loop {
            if cur == waiter {
                cycle.push(cur);
                break;
            }
            if cycle.contains(&cur) {
                return Ok(());
            }
            cycle.push(cur);
            match inner.waits_for.get(&cur) {
                Some(&next) => cur = next,
                None => return Ok(()),
            }
        }

        let victim = cycle
            .iter()
            .copied()
            .filter_map(|id| inner.transactions.get(&id).map(|t| (id, t.rollback_cost)))
            .min_by_key(|&(_, cost)| cost)
            .map(|(id, _)| id);

        let Some(victim) = victim else {
            return Ok(());
        };
        if let Some(t) = inner.transactions.get_mut(&victim) {
            t.is_cancelled = true;
        }
        inner.waits_for.remove(&victim);
        info!(victim, ?cycle, "deadlock detected, cancelling victim");
        drop(inner);
        self.activity.notify_all();

        if victim == waiter {
            return Err(CoreError::Deadlock { victim });
        }
        Ok(())
    }

    /// Called once `waiter` actually obtains the resource it was waiting
    /// for, so stale edges don't linger in the graph.
    pub fn clear_wait(&self, waiter: TransId) {
        self.inner.lock().unwrap().waits_for.remove(&waiter);
    }

    /// Blocks new `begin_transaction` calls for the duration of `f` — used
    /// by checkpointing code that wants a stable active-transaction list
    /// for one instant.
    pub fn quiesce<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.lock().unwrap().quiescing = true;
        let result = f();
        self.inner.lock().unwrap().quiescing = false;
        self.activity.notify_all();
        result
    }
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitChecker for TransactionPool {
    fn is_committed(&self, trans_id: TransId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.transactions.get(&trans_id) {
            Some(t) => t.is_committed,
            None => inner.commit_list.is_committed(trans_id),
        }
    }
}
