use crate::ids::{Lsn, PageId};

/// An entry in the buffer pool's dirty page table: a page known to hold
/// unflushed writes, and the LSN it held when it was first dirtied.
///
/// `rec_lsn` anchors the redo-phase starting point at recovery: replay
/// never needs to start earlier than the lowest `rec_lsn` across all
/// dirty pages as of the last checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyPageEntry {
    pub page: PageId,
    pub rec_lsn: Lsn,
}

impl DirtyPageEntry {
    pub fn new(page: PageId, rec_lsn: Lsn) -> Self {
        Self { page, rec_lsn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_carries_fields_through() {
        let e = DirtyPageEntry::new(PageId::new(0, 1), 42);
        assert_eq!(e.page, PageId::new(0, 1));
        assert_eq!(e.rec_lsn, 42);
    }
}
