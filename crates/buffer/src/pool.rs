use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use cooldb_common::{CoreError, CoreResult, DirtyPageEntry, Lsn, PageId, TransId, VersionedPageId};
use tracing::{debug, trace, warn};

use crate::file_manager::FileManager;
use crate::frame::{Affinity, Frame, LockMode, PinToken};

/// The buffer pool's hand-off to the log subsystem: before a dirty frame
/// may be written back, every redo record up to its `end_lsn` must be
/// durable. Implemented by `cooldb-logmgr`; kept as a trait here so this
/// crate never depends on the log crates.
pub trait WalDelegate: Send + Sync {
    fn flush_to(&self, lsn: Lsn) -> CoreResult<()>;
}

/// A delegate that enforces nothing — useful for tests that exercise the
/// pool in isolation from the log subsystem.
pub struct NoopWalDelegate;
impl WalDelegate for NoopWalDelegate {
    fn flush_to(&self, _lsn: Lsn) -> CoreResult<()> {
        Ok(())
    }
}

/// Lets the pool ask whether a `pinTemp` frame's owning transaction has
/// committed, so a discardable spill page can be dropped instead of
/// flushed at eviction time. Implemented by `cooldb-txn`.
pub trait CommitChecker: Send + Sync {
    fn is_committed(&self, trans_id: TransId) -> bool;
}

/// Treats every temp-page owner as uncommitted — always flushes. Used when
/// no transaction pool is wired in (e.g. pool-only unit tests).
pub struct AlwaysFlushCommitChecker;
impl CommitChecker for AlwaysFlushCommitChecker {
    fn is_committed(&self, _trans_id: TransId) -> bool {
        false
    }
}

struct Inner {
    frames: Vec<Frame>,
    page_table: HashMap<VersionedPageId, usize>,
    free_list: VecDeque<usize>,
    hated: VecDeque<usize>,
    liked: VecDeque<usize>,
    loved: VecDeque<usize>,
    dirty: HashMap<PageId, Lsn>,
    capacity: usize,
    max_capacity: usize,
    file_manager: FileManager,
}

impl Inner {
    fn list_for(&mut self, affinity: Affinity) -> &mut VecDeque<usize> {
        match affinity {
            Affinity::None | Affinity::Hated => &mut self.hated,
            Affinity::Liked => &mut self.liked,
            Affinity::Loved => &mut self.loved,
        }
    }
}

/// Page-frame cache enforcing WAL-before-write, a steal/no-force eviction
/// policy, and the HATED/LIKED/LOVED affinity-based replacement scheme.
pub struct BufferPool {
    inner: Mutex<Inner>,
    not_busy: Condvar,
    wal: Arc<dyn WalDelegate>,
    commit_checker: Arc<dyn CommitChecker>,
    page_size: usize,
    dirty_ratio_permille: u32,
}

impl BufferPool {
    pub fn new(
        file_manager: FileManager,
        initial_capacity: usize,
        max_capacity: usize,
        page_size: usize,
        dirty_ratio_permille: u32,
        wal: Arc<dyn WalDelegate>,
    ) -> Self {
        Self::with_commit_checker(
            file_manager,
            initial_capacity,
            max_capacity,
            page_size,
            dirty_ratio_permille,
            wal,
            Arc::new(AlwaysFlushCommitChecker),
        )
    }

    pub fn with_commit_checker(
        file_manager: FileManager,
        initial_capacity: usize,
        max_capacity: usize,
        page_size: usize,
        dirty_ratio_permille: u32,
        wal: Arc<dyn WalDelegate>,
        commit_checker: Arc<dyn CommitChecker>,
    ) -> Self {
        let mut frames = Vec::with_capacity(initial_capacity);
        let mut free_list = VecDeque::with_capacity(initial_capacity);
        for i in 0..initial_capacity {
            frames.push(Frame::empty(page_size));
            free_list.push_back(i);
        }
        Self {
            inner: Mutex::new(Inner {
                frames,
                page_table: HashMap::new(),
                free_list,
                hated: VecDeque::new(),
                liked: VecDeque::new(),
                loved: VecDeque::new(),
                dirty: HashMap::new(),
                capacity: initial_capacity,
                max_capacity,
                file_manager,
            }),
            not_busy: Condvar::new(),
            wal,
            commit_checker,
            page_size,
            dirty_ratio_permille,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Blocking pin in the given mode. Suspends on a mode conflict with a
    /// live pin on the same frame.
    pub fn pin(&self, page: PageId, mode: LockMode) -> CoreResult<PinToken> {
        self.pin_inner(VersionedPageId::current(page), mode, true, None)
            .map(|t| t.expect("blocking pin always yields a token"))
    }

    /// Non-blocking pin: returns `Ok(None)` rather than suspending if the
    /// frame is unavailable in the requested mode.
    pub fn try_pin(&self, page: PageId, mode: LockMode) -> CoreResult<Option<PinToken>> {
        self.pin_inner(VersionedPageId::current(page), mode, false, None)
    }

    /// Zero-fills a frame without reading from disk and pins it EXCLUSIVE.
    pub fn pin_new(&self, page: PageId) -> CoreResult<PinToken> {
        let identity = VersionedPageId::current(page);
        let mut guard = self.inner.lock().unwrap();
        if guard.page_table.contains_key(&identity) {
            drop(guard);
            return self.pin(page, LockMode::Exclusive);
        }
        let idx = self.acquire_frame_for(&mut guard, identity)?;
        {
            let frame = &mut guard.frames[idx];
            frame.data.iter_mut().for_each(|b| *b = 0);
            frame.pin_count = 1;
            frame.lock_mode = Some(LockMode::Exclusive);
        }
        guard.page_table.insert(identity, idx);
        let gen = guard.frames[idx].generation;
        debug!(%page, "pinNew");
        Ok(PinToken { frame_index: idx, generation: gen })
    }

    /// Zero-fills, pins EXCLUSIVE, marks dirty, and binds the frame to a
    /// transaction for the sort engine's discardable spill pages.
    pub fn pin_temp(&self, page: PageId, trans_id: TransId) -> CoreResult<PinToken> {
        let token = self.pin_new(page)?;
        let mut guard = self.inner.lock().unwrap();
        let frame = &mut guard.frames[token.frame_index];
        frame.dirty = true;
        frame.owning_trans = Some(trans_id);
        Ok(token)
    }

    /// Returns a frame holding an in-memory copy of the current page,
    /// identified by the (page, transId, version) triple. Copies are never
    /// flushed to disk.
    pub fn pin_version(&self, page: PageId, trans_id: TransId, version: u64) -> CoreResult<PinToken> {
        let identity = VersionedPageId::versioned(page, trans_id, version);
        {
            let mut guard = self.inner.lock().unwrap();
            if let Some(&idx) = guard.page_table.get(&identity) {
                guard.frames[idx].pin_count += 1;
                guard.frames[idx].lock_mode = Some(LockMode::Shared);
                let gen = guard.frames[idx].generation;
                return Ok(PinToken { frame_index: idx, generation: gen });
            }
        }
        // Not cached: copy the current page's bytes into a fresh frame.
        let current = self.pin(page, LockMode::Shared)?;
        let mut buf = vec![0u8; self.page_size];
        self.with_frame(current, |data| buf.copy_from_slice(data))?;
        self.unpin(current, Affinity::None)?;

        let mut guard = self.inner.lock().unwrap();
        let idx = self.acquire_frame_for(&mut guard, identity)?;
        guard.frames[idx].data.copy_from_slice(&buf);
        guard.frames[idx].pin_count = 1;
        guard.frames[idx].lock_mode = Some(LockMode::Exclusive);
        guard.page_table.insert(identity, idx);
        let gen = guard.frames[idx].generation;
        Ok(PinToken { frame_index: idx, generation: gen })
    }

    fn pin_inner(
        &self,
        identity: VersionedPageId,
        mode: LockMode,
        blocking: bool,
        _unused: Option<()>,
    ) -> CoreResult<Option<PinToken>> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(&idx) = guard.page_table.get(&identity) {
                let frame = &guard.frames[idx];
                let conflict = match (frame.lock_mode, mode) {
                    (None, _) => false,
                    (Some(LockMode::Shared), LockMode::Shared) => false,
                    _ => frame.pin_count > 0,
                };
                if !conflict {
                    let frame = &mut guard.frames[idx];
                    frame.pin_count += 1;
                    frame.lock_mode = Some(mode);
                    trace!(?identity, ?mode, "pin hit");
                    return Ok(Some(PinToken { frame_index: idx, generation: frame.generation }));
                }
                if !blocking {
                    return Ok(None);
                }
                guard.frames[idx].waiter_count += 1;
                guard = self.not_busy.wait(guard).unwrap();
                guard.frames[idx].waiter_count = guard.frames[idx].waiter_count.saturating_sub(1);
                continue;
            }

            let idx = self.acquire_frame_for(&mut guard, identity)?;
            {
                let page_size = self.page_size;
                let mut buf = vec![0u8; page_size];
                guard.file_manager.fetch(identity.page, &mut buf).map_err(|e| CoreError::Io(
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                ))?;
                let frame = &mut guard.frames[idx];
                frame.data.copy_from_slice(&buf);
                frame.pin_count = 1;
                frame.lock_mode = Some(mode);
            }
            guard.page_table.insert(identity, idx);
            debug!(?identity, "page fetched into pool");
            return Ok(Some(PinToken { frame_index: idx, generation: guard.frames[idx].generation }));
        }
    }

    /// Runs `f` against the pinned frame's raw bytes.
    pub fn with_frame<R>(&self, token: PinToken, f: impl FnOnce(&mut [u8]) -> R) -> CoreResult<R> {
        let mut guard = self.inner.lock().unwrap();
        self.check_token(&guard, token)?;
        Ok(f(&mut guard.frames[token.frame_index].data))
    }

    fn check_token(&self, guard: &Inner, token: PinToken) -> CoreResult<()> {
        let frame = guard
            .frames
            .get(token.frame_index)
            .ok_or_else(|| CoreError::BufferNotFound(PageId::NULL))?;
        if frame.generation != token.generation {
            return Err(CoreError::BufferNotFound(PageId::NULL));
        }
        Ok(())
    }

    pub fn unpin(&self, token: PinToken, affinity: Affinity) -> CoreResult<()> {
        self.unpin_impl(token, affinity, None)
    }

    pub fn unpin_dirty(&self, token: PinToken, affinity: Affinity, end_lsn: Lsn) -> CoreResult<()> {
        self.unpin_impl(token, affinity, Some(end_lsn))
    }

    fn unpin_impl(&self, token: PinToken, affinity: Affinity, end_lsn: Option<Lsn>) -> CoreResult<()> {
        let mut guard = self.inner.lock().unwrap();
        self.check_token(&guard, token)?;
        let idx = token.frame_index;
        let identity = guard.frames[idx].identity.expect("pinned frame always has an identity");

        {
            let frame = &mut guard.frames[idx];
            frame.pin_count = frame.pin_count.saturating_sub(1);
            frame.affinity = frame.affinity.apply(affinity);
            frame.clocked = true;
            if let Some(end_lsn) = end_lsn {
                frame.dirty = true;
                frame.end_lsn = frame.end_lsn.max(end_lsn);
                if frame.rec_lsn == 0 {
                    frame.rec_lsn = end_lsn;
                }
            }
        }

        if end_lsn.is_some() {
            let rec_lsn = guard.frames[idx].rec_lsn;
            guard.dirty.entry(identity.page).or_insert(rec_lsn);
        }

        let new_affinity = guard.frames[idx].affinity;
        guard.list_for(new_affinity).push_back(idx);

        drop(guard);
        self.not_busy.notify_all();
        Ok(())
    }

    /// Selects a replacement victim within `guard`, evicting it (honoring
    /// WAL) and rebinding it to `identity`. Grows the pool if no victim is
    /// found and capacity allows; fails with `BufferExhausted` otherwise.
    fn acquire_frame_for(&self, guard: &mut std::sync::MutexGuard<'_, Inner>, identity: VersionedPageId) -> CoreResult<usize> {
        if let Some(idx) = guard.free_list.pop_front() {
            guard.frames[idx].reset_for(identity);
            return Ok(idx);
        }

        if let Some(idx) = self.select_victim(guard)? {
            self.evict(guard, idx)?;
            guard.frames[idx].reset_for(identity);
            return Ok(idx);
        }

        if guard.capacity < guard.max_capacity {
            let page_size = self.page_size;
            let idx = guard.frames.len();
            guard.frames.push(Frame::empty(page_size));
            guard.capacity += 1;
            guard.frames[idx].reset_for(identity);
            return Ok(idx);
        }

        warn!("buffer pool exhausted: no evictable frame and at max capacity");
        Err(CoreError::BufferExhausted)
    }

    fn select_victim(&self, guard: &mut std::sync::MutexGuard<'_, Inner>) -> CoreResult<Option<usize>> {
        for affinity in [Affinity::Hated, Affinity::Liked, Affinity::Loved] {
            if let Some(idx) = self.scan_list(guard, affinity) {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    fn scan_list(&self, guard: &mut std::sync::MutexGuard<'_, Inner>, affinity: Affinity) -> Option<usize> {
        let all_loved = guard.hated.is_empty() && guard.liked.is_empty();
        if affinity == Affinity::Loved && !all_loved {
            return None;
        }

        let list_len = guard.list_for(affinity).len();
        let mut fallback = None;
        for _ in 0..list_len {
            let idx = match guard.list_for(affinity).pop_front() {
                Some(idx) => idx,
                None => break,
            };
            let frame_affinity = guard.frames[idx].affinity;
            if frame_affinity != affinity {
                continue; // upgraded elsewhere; drop this stale entry
            }
            if guard.frames[idx].is_in_use() {
                guard.list_for(affinity).push_back(idx);
                continue;
            }
            if guard.frames[idx].clocked {
                guard.frames[idx].clocked = false;
                if fallback.is_none() {
                    fallback = Some(idx);
                }
                continue;
            }
            return Some(idx);
        }
        fallback
    }

    fn evict(&self, guard: &mut std::sync::MutexGuard<'_, Inner>, idx: usize) -> CoreResult<()> {
        let identity = guard.frames[idx].identity.expect("victim must have an identity");
        if let Some(owner) = guard.frames[idx].owning_trans {
            if self.commit_checker.is_committed(owner) {
                guard.page_table.remove(&identity);
                guard.dirty.remove(&identity.page);
                debug!(?identity, owner, "discarded committed temp frame");
                return Ok(());
            }
        }
        if guard.frames[idx].dirty {
            let end_lsn = guard.frames[idx].end_lsn;
            self.wal.flush_to(end_lsn)?;
            let page_size = self.page_size;
            let mut buf = vec![0u8; page_size];
            buf.copy_from_slice(&guard.frames[idx].data);
            guard
                .file_manager
                .flush(identity.page, &buf, false)
                .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            guard.dirty.remove(&identity.page);
        }
        guard.page_table.remove(&identity);
        debug!(?identity, "frame evicted");
        Ok(())
    }

    /// Snapshots the dirty set, sorts by physical (file-id, page-id), and
    /// flushes each without fsync. Returns the entries still dirty after
    /// the pass (e.g. pinned EXCLUSIVE during it).
    pub fn check_point(&self) -> CoreResult<Vec<DirtyPageEntry>> {
        let mut guard = self.inner.lock().unwrap();
        let mut entries: Vec<DirtyPageEntry> =
            guard.dirty.iter().map(|(&page, &rec_lsn)| DirtyPageEntry::new(page, rec_lsn)).collect();
        entries.sort_by_key(|e| (e.page.file_id, e.page.page_id));

        let mut still_dirty = Vec::new();
        for entry in entries {
            let identity = VersionedPageId::current(entry.page);
            let idx = match guard.page_table.get(&identity) {
                Some(&idx) => idx,
                None => continue,
            };
            if guard.frames[idx].lock_mode == Some(LockMode::Exclusive) && guard.frames[idx].pin_count > 0 {
                still_dirty.push(entry);
                continue;
            }
            let end_lsn = guard.frames[idx].end_lsn;
            self.wal.flush_to(end_lsn)?;
            let page_size = self.page_size;
            let mut buf = vec![0u8; page_size];
            buf.copy_from_slice(&guard.frames[idx].data);
            guard
                .file_manager
                .flush(entry.page, &buf, false)
                .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            guard.frames[idx].dirty = false;
            guard.dirty.remove(&entry.page);
        }
        debug!(still_dirty = still_dirty.len(), "checkpoint pass complete");
        Ok(still_dirty)
    }

    pub fn dirty_len(&self) -> usize {
        self.inner.lock().unwrap().dirty.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn should_wake_writer(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        if guard.capacity == 0 {
            return false;
        }
        let ratio = (guard.dirty.len() as u64 * 1000) / guard.capacity as u64;
        ratio as u32 > self.dirty_ratio_permille
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(initial: usize, max: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut fm = FileManager::new(64);
        fm.open(0, &dir.path().join("data.0")).unwrap();
        fm.extend(0, 16).unwrap();
        let pool = BufferPool::new(fm, initial, max, 64, 500, Arc::new(NoopWalDelegate));
        (pool, dir)
    }

    #[test]
    fn pin_new_then_unpin_dirty_enters_dirty_set() {
        let (pool, _dir) = pool(4, 4);
        let token = pool.pin_new(PageId::new(0, 0)).unwrap();
        pool.with_frame(token, |data| data[0] = 7).unwrap();
        pool.unpin_dirty(token, Affinity::Liked, 10).unwrap();
        assert_eq!(pool.dirty_len(), 1);
    }

    #[test]
    fn checkpoint_flushes_unpinned_dirty_frames() {
        let (pool, _dir) = pool(4, 4);
        let token = pool.pin_new(PageId::new(0, 1)).unwrap();
        pool.with_frame(token, |data| data.fill(9)).unwrap();
        pool.unpin_dirty(token, Affinity::Liked, 1).unwrap();

        let still_dirty = pool.check_point().unwrap();
        assert!(still_dirty.is_empty());
        assert_eq!(pool.dirty_len(), 0);
    }

    #[test]
    fn pin_shared_is_reentrant() {
        let (pool, _dir) = pool(4, 4);
        let t1 = pool.pin_new(PageId::new(0, 2)).unwrap();
        pool.unpin(t1, Affinity::None).unwrap();

        let a = pool.pin(PageId::new(0, 2), LockMode::Shared).unwrap();
        let b = pool.try_pin(PageId::new(0, 2), LockMode::Shared).unwrap();
        assert!(b.is_some());
        pool.unpin(a, Affinity::None).unwrap();
        pool.unpin(b.unwrap(), Affinity::None).unwrap();
    }

    #[test]
    fn try_pin_exclusive_conflicts_with_live_exclusive() {
        let (pool, _dir) = pool(4, 4);
        let excl = pool.pin_new(PageId::new(0, 3)).unwrap();
        let other = pool.try_pin(PageId::new(0, 3), LockMode::Exclusive).unwrap();
        assert!(other.is_none());
        pool.unpin(excl, Affinity::None).unwrap();
    }

    #[test]
    fn pool_grows_past_initial_capacity_up_to_max() {
        let (pool, _dir) = pool(1, 3);
        let t0 = pool.pin_new(PageId::new(0, 0)).unwrap();
        let t1 = pool.pin_new(PageId::new(0, 1)).unwrap();
        assert_eq!(pool.capacity(), 2);
        pool.unpin(t0, Affinity::None).unwrap();
        pool.unpin(t1, Affinity::None).unwrap();
    }

    #[test]
    fn pin_version_copies_current_page_and_is_never_dirty() {
        let (pool, _dir) = pool(4, 4);
        let cur = pool.pin_new(PageId::new(0, 4)).unwrap();
        pool.with_frame(cur, |data| data[0] = 42).unwrap();
        pool.unpin(cur, Affinity::None).unwrap();

        let ver = pool.pin_version(PageId::new(0, 4), 9, 1).unwrap();
        pool.with_frame(ver, |data| assert_eq!(data[0], 42)).unwrap();
        pool.unpin(ver, Affinity::None).unwrap();
        assert_eq!(pool.dirty_len(), 0);
    }
}
