//! MVCC rollback engine: reconstructs a historical page version in place
//! inside a pinned frame by walking its undo chain and compensating any
//! update invisible to a transaction's snapshot.

pub mod rollback;

pub use rollback::RollbackEngine;
