use cooldb_common::{Lsn, TransId, VersionedPageId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A hint to the buffer replacement algorithm for how eagerly a frame may
/// be evicted. Affinity only ever moves NONE → HATED → LIKED → LOVED; a
/// request to "downgrade" instead re-ages the frame at the head of its
/// current list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Affinity {
    None,
    Hated,
    Liked,
    Loved,
}

impl Affinity {
    /// Applies a caller's requested affinity, honoring the no-downgrade
    /// rule: the stronger of the current and requested affinity wins.
    pub fn apply(self, requested: Affinity) -> Affinity {
        self.max(requested)
    }
}

/// A frame in the buffer pool: the page-sized byte buffer plus its pin
/// bookkeeping. Frames are never moved once allocated; their *identity*
/// (which versioned page they hold) changes on replacement, tracked by
/// bumping `generation` so stale `PinToken`s are rejected.
pub struct Frame {
    pub generation: u64,
    pub identity: Option<VersionedPageId>,
    pub data: Vec<u8>,
    pub pin_count: u32,
    pub waiter_count: u32,
    pub lock_mode: Option<LockMode>,
    pub affinity: Affinity,
    pub dirty: bool,
    pub clocked: bool,
    /// First LSN that could possibly need replay to recover this page.
    pub rec_lsn: Lsn,
    /// LSN that must be stable before this frame may be written back.
    pub end_lsn: Lsn,
    /// Owning transaction for discardable temporary frames (`pinTemp`).
    pub owning_trans: Option<TransId>,
}

impl Frame {
    pub fn empty(page_size: usize) -> Self {
        Self {
            generation: 0,
            identity: None,
            data: vec![0u8; page_size],
            pin_count: 0,
            waiter_count: 0,
            lock_mode: None,
            affinity: Affinity::None,
            dirty: false,
            clocked: false,
            rec_lsn: 0,
            end_lsn: 0,
            owning_trans: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.pin_count == 0 && self.identity.is_none()
    }

    pub fn is_in_use(&self) -> bool {
        self.pin_count > 0
    }

    /// Resets a frame for a new identity, bumping its generation so any
    /// `PinToken`s referring to its previous occupant become stale.
    pub fn reset_for(&mut self, identity: VersionedPageId) {
        self.generation += 1;
        self.identity = Some(identity);
        self.pin_count = 0;
        self.waiter_count = 0;
        self.lock_mode = None;
        self.affinity = Affinity::None;
        self.dirty = false;
        self.clocked = false;
        self.rec_lsn = 0;
        self.end_lsn = 0;
        self.owning_trans = None;
    }
}

/// An opaque handle to a pinned frame: an arena index plus the generation
/// it was issued against. A stale token (generation mismatch against the
/// frame's current occupant) is rejected rather than dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PinToken {
    pub frame_index: usize,
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_never_downgrades() {
        assert_eq!(Affinity::Loved.apply(Affinity::Hated), Affinity::Loved);
        assert_eq!(Affinity::Hated.apply(Affinity::Loved), Affinity::Loved);
        assert_eq!(Affinity::None.apply(Affinity::Liked), Affinity::Liked);
    }

    #[test]
    fn reset_bumps_generation() {
        let mut f = Frame::empty(16);
        let before = f.generation;
        f.reset_for(VersionedPageId::current(cooldb_common::PageId::new(0, 1)));
        assert_eq!(f.generation, before + 1);
    }
}
