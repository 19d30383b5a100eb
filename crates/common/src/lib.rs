//! Shared types for the `cooldb` transactional storage core: identifiers,
//! on-disk record and page-header layouts, transaction bookkeeping, the
//! master commit list, configuration, and the unified error type.
//!
//! Every other `cooldb-*` crate depends on this one and none of them
//! re-derive these layouts independently.

pub mod commit_list;
pub mod config;
pub mod dirty;
pub mod error;
pub mod ids;
pub mod page_header;
pub mod record;
pub mod transaction;
pub mod undo_dispatch;

pub use commit_list::MasterCommitList;
pub use config::CoreConfig;
pub use dirty::DirtyPageEntry;
pub use error::{CoreError, CoreResult};
pub use ids::{Lsn, PageId, TransId, UndoPointer, VersionedPageId};
pub use page_header::{PageHeader, PAGE_HEADER_SIZE};
pub use record::{Attachment, RecordType, RedoLogRecord, UndoLogRecord};
pub use transaction::{ActiveTransactionInfo, CommitListSnapshot, Transaction};
pub use undo_dispatch::{UndoCallback, UndoDispatchTable};
