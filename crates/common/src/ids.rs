use std::fmt;

/// Log-sequence-number. Zero is reserved and must never be assigned to a
/// real record; both the redo and undo LSN spaces are strictly increasing.
pub type Lsn = u64;

/// A transaction identifier. Monotonically increasing, allocated by the
/// transaction pool.
pub type TransId = u64;

/// Immutable page identity: a short file-id multiplexed by the file manager,
/// plus a page number within that file.
///
/// `file_id` is modeled as `i32` rather than the `u16` spec.md names, so
/// that the NULL sentinel (`file_id = -1`) can actually be represented; see
/// DESIGN.md. On disk it is still packed into the 6-byte `PageId` encoding
/// (2 bytes file-id, 4 bytes page-id).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub file_id: i32,
    pub page_id: i32,
}

impl PageId {
    pub const NULL: PageId = PageId { file_id: -1, page_id: -1 };

    pub fn new(file_id: i32, page_id: i32) -> Self {
        Self { file_id, page_id }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Encode into the 6-byte on-disk layout: file-id (2 bytes, truncated,
    /// little-endian) followed by page-id (4 bytes, little-endian).
    pub fn encode(&self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        buf[0..2].copy_from_slice(&(self.file_id as u16).to_le_bytes());
        buf[2..6].copy_from_slice(&self.page_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; 6]) -> Self {
        let file_id = u16::from_le_bytes(buf[0..2].try_into().unwrap());
        let page_id = i32::from_le_bytes(buf[2..6].try_into().unwrap());
        // u16::MAX maps back to the NULL sentinel's truncated form.
        let file_id = if file_id == 0xFFFF { -1 } else { file_id as i32 };
        Self { file_id, page_id }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.file_id, self.page_id)
    }
}

/// A `PageId` extended with a transaction-id and version number, used to
/// address in-memory reconstructed historical page versions.
///
/// A zero `trans_id` means "the current physical page." Equality and
/// ordering include all three fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionedPageId {
    pub page: PageId,
    pub trans_id: TransId,
    pub version: u64,
}

impl VersionedPageId {
    pub fn current(page: PageId) -> Self {
        Self { page, trans_id: 0, version: 0 }
    }

    pub fn versioned(page: PageId, trans_id: TransId, version: u64) -> Self {
        Self { page, trans_id, version }
    }

    pub fn is_current(&self) -> bool {
        self.trans_id == 0
    }
}

impl fmt::Display for VersionedPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_current() {
            write!(f, "{}", self.page)
        } else {
            write!(f, "{}@t{}v{}", self.page, self.trans_id, self.version)
        }
    }
}

/// A pointer into the undo log: the physical (page, offset) address of an
/// undo record, plus the LSN it was assigned at write time.
///
/// Equality is by `lsn` only — the physical part merely tells readers where
/// to fetch the record from.
#[derive(Clone, Copy, Debug, Default)]
pub struct UndoPointer {
    pub page: PageId,
    pub offset: u16,
    pub lsn: Lsn,
}

impl UndoPointer {
    pub const NULL: UndoPointer = UndoPointer { page: PageId::NULL, offset: 0, lsn: 0 };

    pub fn is_null(&self) -> bool {
        self.lsn == 0
    }

    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..6].copy_from_slice(&self.page.encode());
        buf[6..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; 16]) -> Self {
        let page = PageId::decode(buf[0..6].try_into().unwrap());
        let offset = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let lsn = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Self { page, offset, lsn }
    }
}

impl PartialEq for UndoPointer {
    fn eq(&self, other: &Self) -> bool {
        self.lsn == other.lsn
    }
}
impl Eq for UndoPointer {}

impl PartialOrd for UndoPointer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for UndoPointer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.lsn.cmp(&other.lsn)
    }
}

impl fmt::Display for UndoPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn={}@{}+{}", self.lsn, self.page, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_roundtrip() {
        let p = PageId::new(7, 12345);
        assert_eq!(PageId::decode(&p.encode()), p);
    }

    #[test]
    fn null_page_id_roundtrip() {
        assert_eq!(PageId::decode(&PageId::NULL.encode()), PageId::NULL);
    }

    #[test]
    fn undo_pointer_equality_ignores_physical_part() {
        let a = UndoPointer { page: PageId::new(1, 1), offset: 0, lsn: 5 };
        let b = UndoPointer { page: PageId::new(9, 9), offset: 99, lsn: 5 };
        assert_eq!(a, b);
    }

    #[test]
    fn versioned_page_id_orders_by_all_fields() {
        let a = VersionedPageId::versioned(PageId::new(1, 1), 1, 1);
        let b = VersionedPageId::versioned(PageId::new(1, 1), 1, 2);
        assert!(a < b);
    }
}
