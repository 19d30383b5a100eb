/// Indicator bytes that lead every framed record in the circular redo log.
pub const INDICATOR_BAD: u8 = 0x00;
pub const INDICATOR_OK: u8 = 0xFD;
pub const INDICATOR_WRAP: u8 = 0xFE;
pub const INDICATOR_EOL: u8 = 0xFF;

/// Bytes written eagerly at append time for one record: `indicator + size`.
/// The trailing EOL byte is written lazily by `flush_to`, and is not
/// counted here.
pub const EAGER_OVERHEAD: u64 = 3;

/// Full on-disk framing overhead including the lazily-written EOL byte:
/// `[indicator:1][size:2][body][eol:1]`.
pub const FULL_OVERHEAD: u64 = 4;
