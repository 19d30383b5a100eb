//! `cooldb` ties the buffer pool, dual redo/undo write-ahead log, and MVCC
//! rollback machinery from the `cooldb-*` crates into a single embeddable
//! storage engine core.

mod core;
mod recovery;

pub use crate::core::Core;
pub use cooldb_buffer::{Affinity, LockMode, PinToken};
pub use cooldb_common::{
    CoreConfig, CoreError, CoreResult, Lsn, PageHeader, PageId, RecordType, RedoLogRecord, TransId, UndoCallback, UndoDispatchTable,
    UndoPointer, PAGE_HEADER_SIZE,
};
