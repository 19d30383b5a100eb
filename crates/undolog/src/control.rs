use cooldb_common::Lsn;
use serde::{Deserialize, Serialize};

/// Crash-recoverable marker for an in-flight extent allocation: the
/// free-list and active-tail values to restore if a crash happens before
/// the operation commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoInfo {
    pub prev_free_head: u32,
    pub prev_tail_page: u32,
}

/// Crash-recoverable marker for an in-flight garbage-collection step: the
/// page-link update that must be (re-)applied if a crash happens between
/// recording it and clearing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedoGcInfo {
    pub extent_last_page: u32,
    pub former_free_head: u32,
}

/// Page 0 of the undo log file: anchors the active and free extent lists,
/// the extent size and count, the garbage-collection floor, and the
/// crash-recovery markers for in-flight structural operations.
///
/// Modeled as `Option<T>` fields rather than raw sentinel values so the
/// crash-recovery logic stays type-safe, even though the on-disk layout
/// still serializes through the 0-means-NULL sentinel convention used for
/// page links.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPage {
    pub extent_size: u32,
    pub extent_count: u32,
    pub active_head: u32,
    pub active_tail: u32,
    pub free_head: u32,
    pub persisted_tail_page: u32,
    pub persisted_commit_lsn: Lsn,
    pub min_undo: Lsn,
    pub undo_info: Option<UndoInfo>,
    pub redo_gc_info: Option<RedoGcInfo>,
}

impl ControlPage {
    pub fn new(extent_size: u32) -> Self {
        Self {
            extent_size,
            extent_count: 0,
            active_head: 0,
            active_tail: 0,
            free_head: 0,
            persisted_tail_page: 0,
            persisted_commit_lsn: 0,
            min_undo: 1,
            undo_info: None,
            redo_gc_info: None,
        }
    }

    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let json = serde_json::to_vec(self).expect("control page always serializes");
        assert!(json.len() + 4 <= page_size, "control page contents overflow a single page");
        let mut buf = vec![0u8; page_size];
        buf[0..4].copy_from_slice(&(json.len() as u32).to_le_bytes());
        buf[4..4 + json.len()].copy_from_slice(&json);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        serde_json::from_slice(&buf[4..4 + len]).expect("control page is well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_page_roundtrips() {
        let mut cp = ControlPage::new(64);
        cp.active_head = 1;
        cp.undo_info = Some(UndoInfo { prev_free_head: 2, prev_tail_page: 3 });
        let encoded = cp.encode(512);
        let back = ControlPage::decode(&encoded);
        assert_eq!(cp, back);
    }
}
