use crate::ids::{Lsn, UndoPointer};

/// Fixed-size header at the start of every logged data page.
///
/// Layout (little-endian, 32 bytes total):
///   pageLSN         : u64           (8)   — last redo LSN applied
///   pageUndoNxtLSN   : UndoPointer  (16)  — most recent undo record for this page
///   pageFirstLSN     : u64          (8)   — oldest live undo LSN on this page
pub const PAGE_HEADER_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub page_lsn: Lsn,
    pub page_undo_nxt_lsn: UndoPointer,
    pub page_first_lsn: Lsn,
}

impl PageHeader {
    pub fn encode(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.page_lsn.to_le_bytes());
        buf[8..24].copy_from_slice(&self.page_undo_nxt_lsn.encode());
        buf[24..32].copy_from_slice(&self.page_first_lsn.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; PAGE_HEADER_SIZE]) -> Self {
        let page_lsn = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let page_undo_nxt_lsn = UndoPointer::decode(buf[8..24].try_into().unwrap());
        let page_first_lsn = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        Self { page_lsn, page_undo_nxt_lsn, page_first_lsn }
    }

    pub fn write_into(&self, page: &mut [u8]) {
        page[0..PAGE_HEADER_SIZE].copy_from_slice(&self.encode());
    }

    pub fn read_from(page: &[u8]) -> Self {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf.copy_from_slice(&page[0..PAGE_HEADER_SIZE]);
        Self::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PageId;

    #[test]
    fn header_roundtrips_through_a_page_buffer() {
        let hdr = PageHeader {
            page_lsn: 42,
            page_undo_nxt_lsn: UndoPointer { page: PageId::new(0, 3), offset: 100, lsn: 41 },
            page_first_lsn: 10,
        };
        let mut page = vec![0xAAu8; 16384];
        hdr.write_into(&mut page);
        let back = PageHeader::read_from(&page);
        assert_eq!(hdr, back);
        // Bytes past the header are untouched.
        assert_eq!(page[PAGE_HEADER_SIZE], 0xAA);
    }
}
