use cooldb_common::CoreError;
use cooldb_redolog::RedoLogError;
use cooldb_undolog::UndoLogError;

#[derive(Debug, thiserror::Error)]
pub enum LogManagerError {
    #[error(transparent)]
    Redo(#[from] RedoLogError),

    #[error(transparent)]
    Undo(#[from] UndoLogError),

    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
}

impl From<LogManagerError> for CoreError {
    fn from(e: LogManagerError) -> Self {
        match e {
            LogManagerError::Redo(RedoLogError::LogExhausted) => CoreError::LogExhausted,
            LogManagerError::Redo(RedoLogError::LogNotFound(lsn)) => CoreError::LogNotFound(lsn),
            LogManagerError::Redo(RedoLogError::Corrupt(lsn)) => CoreError::LogNotFound(lsn),
            LogManagerError::Redo(RedoLogError::Io(io)) => CoreError::Io(io),
            LogManagerError::Undo(UndoLogError::LogExhausted) => CoreError::LogExhausted,
            LogManagerError::Undo(UndoLogError::LogNotFound(addr)) => CoreError::LogNotFound(addr.lsn),
            LogManagerError::Undo(UndoLogError::Corrupt(msg)) => {
                CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
            }
            LogManagerError::Undo(UndoLogError::Io(io)) => CoreError::Io(io),
            LogManagerError::Undo(UndoLogError::Serde(e)) => {
                CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
            }
            LogManagerError::Codec(e) => CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        }
    }
}

pub type LogManagerResult<T> = Result<T, LogManagerError>;
