use thiserror::Error;

use crate::ids::{PageId, TransId};

/// The unified error type surfaced by every layer of the transactional
/// core. Each layer crate maps its own internal error enum into this one
/// at its public boundary, the way the teacher's crates fold I/O and
/// protocol errors into a single crate-level enum.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("deadlock detected, transaction {victim} chosen as victim")]
    Deadlock { victim: TransId },

    #[error("transaction {0} has been cancelled and must roll back")]
    TransactionCancelled(TransId),

    #[error("page {0} is not resident in the buffer pool")]
    BufferNotFound(PageId),

    #[error("buffer pool is at maximum capacity with no evictable frame")]
    BufferExhausted,

    #[error("pin wait was cancelled")]
    PinCancelled,

    #[error("redo log has no remaining capacity before the firewall")]
    LogExhausted,

    #[error("log record at lsn {0} could not be located")]
    LogNotFound(u64),

    #[error("transaction {0} conflicts with a concurrent committed write")]
    SerializationConflict(TransId),

    #[error("rollback of transaction {0} failed: {reason}")]
    RollbackFailed { trans: TransId, reason: String },

    #[error("operation interrupted while waiting")]
    Interrupted,

    /// Class-3 (§7): partial I/O, an internal integrity check failing, or
    /// recovery that cannot complete. Non-recoverable — the caller must
    /// discard the `Core` and reopen.
    #[error("fatal error, database must be reopened: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_error_names_the_victim() {
        let err = CoreError::Deadlock { victim: 7 };
        assert_eq!(err.to_string(), "deadlock detected, transaction 7 chosen as victim");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
