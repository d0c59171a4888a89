//! Protocol-level failures. Any of these terminates the offending session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("short read: need {need} bytes, have {have}")]
    ShortRead { need: usize, have: usize },
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("invalid utf-8 in text field")]
    InvalidUtf8,
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },
    #[error("unsupported batch flags 0x{0:02x}")]
    BadBatchFlags(u8),
    #[error("decompress batch: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
}
