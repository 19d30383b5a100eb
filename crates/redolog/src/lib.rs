//! The fixed-size circular redo log: a staging-buffer writer and an
//! independent reader, framing records as `[indicator][size][body][eol]`.

pub mod framing;
pub mod reader;
pub mod writer;

pub use framing::{EAGER_OVERHEAD, FULL_OVERHEAD, INDICATOR_BAD, INDICATOR_EOL, INDICATOR_OK, INDICATOR_WRAP};
pub use reader::{RedoLogIterator, RedoLogReader};
pub use writer::{RedoLogError, RedoLogResult, RedoLogWriter};
