//! Payload field codec.
//!
//! All integers are little-endian. A position is 5 bytes (u16 x, u16 y, u8 z);
//! text is a u16 byte length followed by raw UTF-8.

use crate::WireError;

/// Types that write themselves into a payload.
pub trait WireEncode {
    fn encode(&self, w: &mut PacketWriter);
}

/// Types that read themselves back from a payload.
pub trait WireDecode: Sized {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, WireError>;
}

#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_pos(&mut self, x: u16, y: u16, z: u8) -> &mut Self {
        self.put_u16(x).put_u16(y).put_u8(z)
    }

    /// Text longer than `u16::MAX` bytes is cut at the last char boundary
    /// that fits.
    pub fn put_str(&mut self, s: &str) -> &mut Self {
        let mut end = s.len().min(usize::from(u16::MAX));
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &s.as_bytes()[..end];
        // `end` is bounded by u16::MAX above.
        #[allow(clippy::cast_possible_truncation)]
        self.put_u16(end as u16);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put<T: WireEncode + ?Sized>(&mut self, v: &T) -> &mut Self {
        v.encode(self);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PacketReader<'a> {
    inp: &'a [u8],
}

impl<'a> PacketReader<'a> {
    #[must_use]
    pub fn new(inp: &'a [u8]) -> Self {
        Self { inp }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        if self.inp.len() < N {
            return Err(WireError::ShortRead {
                need: N,
                have: self.inp.len(),
            });
        }
        let (a, b) = self.inp.split_at(N);
        self.inp = b;
        let mut buf = [0u8; N];
        buf.copy_from_slice(a);
        Ok(buf)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_pos(&mut self) -> Result<(u16, u16, u8), WireError> {
        Ok((self.get_u16()?, self.get_u16()?, self.get_u8()?))
    }

    pub fn get_str(&mut self) -> Result<&'a str, WireError> {
        let len = usize::from(self.get_u16()?);
        if self.inp.len() < len {
            return Err(WireError::ShortRead {
                need: len,
                have: self.inp.len(),
            });
        }
        let (a, b) = self.inp.split_at(len);
        self.inp = b;
        std::str::from_utf8(a).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn get<T: WireDecode>(&mut self) -> Result<T, WireError> {
        T::decode(self)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inp.len()
    }

    /// Require the payload to be fully consumed.
    pub fn finish(self) -> Result<(), WireError> {
        if self.inp.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(self.inp.len()))
        }
    }
}
