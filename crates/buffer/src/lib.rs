//! The file substrate and buffer pool: page-granular file I/O, and the
//! pinning/replacement/dirty-tracking cache built on top of it.

pub mod file_manager;
pub mod frame;
pub mod pool;
pub mod writer;

pub use file_manager::{FileManager, FileManagerError, FileManagerResult};
pub use frame::{Affinity, Frame, LockMode, PinToken};
pub use pool::{AlwaysFlushCommitChecker, BufferPool, CommitChecker, NoopWalDelegate, WalDelegate};
pub use writer::BackgroundWriter;
