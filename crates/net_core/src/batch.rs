//! Per-flush batch: everything a connection receives in one step goes out as a
//! single transport write.
//!
//! Format:
//! - u8 flags (bit 0 = body is LZ4 block-compressed, size-prepended)
//! - body: back-to-back frames (see `frame`), possibly compressed
//!
//! Byte streams (TCP) carry each batch behind a u32 LE length so the peer can
//! find batch boundaries.

use std::io::{self, Read, Write};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::WireError;

pub const FLAG_LZ4: u8 = 0x01;

/// Wrap `body` into a batch. Compression is attempted only when
/// `compress_threshold` is set and `body` reaches it, and is kept only if it
/// actually shrinks the body.
#[must_use]
pub fn encode_batch(body: &[u8], compress_threshold: Option<usize>) -> Vec<u8> {
    if let Some(threshold) = compress_threshold
        && body.len() >= threshold
    {
        let packed = compress_prepend_size(body);
        if packed.len() < body.len() {
            let mut out = Vec::with_capacity(packed.len() + 1);
            out.push(FLAG_LZ4);
            out.extend_from_slice(&packed);
            return out;
        }
    }
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(0);
    out.extend_from_slice(body);
    out
}

/// Unwrap a batch back into its frame body.
pub fn decode_batch(batch: &[u8]) -> Result<Vec<u8>, WireError> {
    let Some((&flags, body)) = batch.split_first() else {
        return Err(WireError::ShortRead { need: 1, have: 0 });
    };
    match flags {
        0 => Ok(body.to_vec()),
        FLAG_LZ4 => Ok(decompress_size_prepended(body)?),
        other => Err(WireError::BadBatchFlags(other)),
    }
}

/// Length prefix put in front of every batch on a byte stream.
pub const STREAM_PREFIX: usize = 4;

/// Write one batch to a byte stream, length-prefixed.
pub fn write_stream_batch(w: &mut impl Write, batch: &[u8]) -> io::Result<()> {
    let len = u32::try_from(batch.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "batch exceeds u32 length"))?;
    let mut out = Vec::with_capacity(STREAM_PREFIX + batch.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(batch);
    w.write_all(&out)
}

/// Blocking read of one length-prefixed batch (client side).
pub fn read_stream_batch(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; STREAM_PREFIX];
    r.read_exact(&mut len)?;
    let len = usize::try_from(u32::from_le_bytes(len))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "batch length overflows usize"))?;
    let mut batch = vec![0u8; len];
    r.read_exact(&mut batch)?;
    Ok(batch)
}
