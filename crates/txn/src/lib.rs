//! Transaction pool: per-transaction bookkeeping, the master commit list
//! integration, MVCC snapshot construction, and waits-for-graph-based
//! deadlock detection.

pub mod pool;

pub use pool::TransactionPool;
