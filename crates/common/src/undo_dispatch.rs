use std::collections::HashMap;
use std::sync::Arc;

use crate::record::UndoLogRecord;

/// A caller-registered handler that knows how to apply (or compensate for)
/// a single undo record belonging to one `segment_type`, given mutable
/// access to the pinned frame's bytes.
///
/// Segment types are owned by whatever higher layer defines the on-disk
/// page formats (a heap file, an index, …); the transactional core itself
/// is agnostic to their contents and only dispatches by the tag carried on
/// each record. The callback must not pin any page other than the one it
/// was handed.
pub type UndoCallback = Arc<dyn Fn(&UndoLogRecord, &mut [u8]) -> Result<(), crate::error::CoreError> + Send + Sync>;

/// Maps `segment_type` byte tags to their undo handler, consulted by the
/// rollback engine and by crash recovery's undo pass.
#[derive(Clone, Default)]
pub struct UndoDispatchTable {
    handlers: HashMap<u8, UndoCallback>,
}

impl UndoDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, segment_type: u8, callback: UndoCallback) {
        self.handlers.insert(segment_type, callback);
    }

    pub fn dispatch(&self, record: &UndoLogRecord, frame: &mut [u8]) -> Result<(), crate::error::CoreError> {
        match self.handlers.get(&record.redo.segment_type) {
            Some(cb) => cb(record, frame),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PageId, UndoPointer};
    use crate::record::{RecordType, RedoLogRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_invokes_the_registered_handler_for_its_segment_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut table = UndoDispatchTable::new();
        table.register(
            3,
            Arc::new(move |_rec, _frame| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let redo = RedoLogRecord::new(RecordType::Update, 1, PageId::new(0, 1), PageId::new(0, 1), 3, 1);
        let undo = UndoLogRecord::new(redo, UndoPointer::NULL, UndoPointer::NULL);
        let mut frame = [0u8; 16];
        table.dispatch(&undo, &mut frame).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_is_a_no_op_for_unregistered_segment_types() {
        let table = UndoDispatchTable::new();
        let redo = RedoLogRecord::new(RecordType::Update, 1, PageId::new(0, 1), PageId::new(0, 1), 9, 1);
        let undo = UndoLogRecord::new(redo, UndoPointer::NULL, UndoPointer::NULL);
        let mut frame = [0u8; 16];
        assert!(table.dispatch(&undo, &mut frame).is_ok());
    }
}
