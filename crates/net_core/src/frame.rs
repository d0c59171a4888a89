//! Length-prefixed message envelope.
//!
//! Format (little-endian):
//! - u8 opcode
//! - u16 LEN (bytes of payload)
//! - [u8; LEN] payload
//!
//! Inbound bytes arrive in arbitrary chunks; `FrameReader` buffers them until a
//! full envelope is available so command parsing never sees a partial message.

use crate::WireError;

pub const HEADER_LEN: usize = 3;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Append one framed message to `out`.
pub fn write_msg(out: &mut Vec<u8>, opcode: u8, payload: &[u8]) -> Result<(), WireError> {
    let len = u16::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: payload.len(),
        max: MAX_PAYLOAD_LEN,
    })?;
    out.reserve(HEADER_LEN + payload.len());
    out.push(opcode);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// A framed message borrowed from an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub opcode: u8,
    pub payload: &'a [u8],
}

/// Read one framed message from the front of `inp`.
///
/// Returns `Ok(None)` when `inp` does not yet hold a complete envelope; on
/// success also returns the number of bytes consumed.
pub fn read_msg(inp: &[u8]) -> Result<Option<(Frame<'_>, usize)>, WireError> {
    if inp.len() < HEADER_LEN {
        return Ok(None);
    }
    let opcode = inp[0];
    let len = usize::from(u16::from_le_bytes([inp[1], inp[2]]));
    let total = HEADER_LEN + len;
    if inp.len() < total {
        return Ok(None);
    }
    Ok(Some((
        Frame {
            opcode,
            payload: &inp[HEADER_LEN..total],
        },
        total,
    )))
}

/// Split a buffer of back-to-back frames (e.g. a decoded batch body).
/// Fails if the buffer ends in a partial frame.
pub fn split_frames(mut inp: &[u8]) -> Result<Vec<Frame<'_>>, WireError> {
    let mut out = Vec::new();
    while !inp.is_empty() {
        let Some((frame, used)) = read_msg(inp)? else {
            return Err(WireError::ShortRead {
                need: HEADER_LEN,
                have: inp.len(),
            });
        };
        out.push(frame);
        inp = &inp[used..];
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Reassembles frames from a stream of byte chunks.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    max_payload: usize,
}

impl FrameReader {
    /// `max_payload` caps inbound frames below the envelope's u16 limit.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload: max_payload.min(MAX_PAYLOAD_LEN),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<OwnedFrame>, WireError> {
        if self.buf.len() >= HEADER_LEN {
            let len = usize::from(u16::from_le_bytes([self.buf[1], self.buf[2]]));
            if len > self.max_payload {
                return Err(WireError::FrameTooLarge {
                    len,
                    max: self.max_payload,
                });
            }
        }
        let (frame, used) = match read_msg(&self.buf)? {
            Some((f, used)) => (
                OwnedFrame {
                    opcode: f.opcode,
                    payload: f.payload.to_vec(),
                },
                used,
            ),
            None => return Ok(None),
        };
        self.buf.drain(..used);
        Ok(Some(frame))
    }
}
