//! Fixed-backing byte container with a position cursor, used as the
//! serialization primitive for the PDU codec (`crate::pdu`).
//!
//! Boundary-checked slicing over big-endian primitives via `byteorder`,
//! since the wire format here is explicitly big-endian.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Error returned when a read or write would run past the buffer's bounds.
#[derive(Debug, Eq, PartialEq)]
pub struct OutOfRange {
    pub requested: usize,
    pub available: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "octet buffer out of range: requested {} bytes, {} available",
            self.requested, self.available
        )
    }
}

impl std::error::Error for OutOfRange {}

pub type Result<T> = std::result::Result<T, OutOfRange>;

/// A byte buffer with a cursor, used to read or write primitive integers
/// big-endian without depending on platform endianness.
///
/// `OctetBuffer` either owns its storage (`allocate`) or borrows someone
/// else's (`wrap`); either way `slice()` hands back exactly the bytes
/// written/read so far, honoring any offset the buffer was wrapped with.
pub struct OctetBuffer {
    data: Vec<u8>,
    offset: usize,
    pos: usize,
}

impl OctetBuffer {
    /// Allocate a new buffer of `n` zeroed bytes, cursor at 0.
    #[inline]
    pub fn allocate(n: usize) -> OctetBuffer {
        OctetBuffer {
            data: vec![0u8; n],
            offset: 0,
            pos: 0,
        }
    }

    /// Wrap an existing byte vector; the cursor starts at 0.
    #[inline]
    pub fn wrap(bytes: Vec<u8>) -> OctetBuffer {
        OctetBuffer {
            data: bytes,
            offset: 0,
            pos: 0,
        }
    }

    /// Total capacity of the backing storage.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute position.
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// The full backing slice, honoring the wrap offset.
    #[inline]
    pub fn slice(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn check(&self, at: usize, n: usize) -> Result<()> {
        let end = at.checked_add(n).unwrap_or(usize::MAX);
        if end > self.data.len() {
            Err(OutOfRange {
                requested: n,
                available: self.data.len().saturating_sub(at),
            })
        } else {
            Ok(())
        }
    }

    /// Read an unsigned 8-bit value at the cursor, advancing it.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.check(self.pos, 1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a big-endian unsigned 16-bit value at the cursor, advancing it.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.check(self.pos, 2)?;
        let v = BigEndian::read_u16(&self.data[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    /// Read a big-endian unsigned 32-bit value at the cursor, advancing it.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.check(self.pos, 4)?;
        let v = BigEndian::read_u32(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    /// Write an unsigned 8-bit value at the cursor, advancing it.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.check(self.pos, 1)?;
        self.data[self.pos] = value;
        self.pos += 1;
        Ok(())
    }

    /// Write a big-endian unsigned 16-bit value at the cursor, advancing it.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.check(self.pos, 2)?;
        BigEndian::write_u16(&mut self.data[self.pos..self.pos + 2], value);
        self.pos += 2;
        Ok(())
    }

    /// Write a big-endian unsigned 32-bit value at the cursor, advancing it.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.check(self.pos, 4)?;
        BigEndian::write_u32(&mut self.data[self.pos..self.pos + 4], value);
        self.pos += 4;
        Ok(())
    }

    /// Read `n` bytes at the cursor into a fresh `Vec`, advancing it.
    #[inline]
    pub fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check(self.pos, n)?;
        let v = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(v)
    }

    /// Write `bytes` at the cursor, advancing it past them.
    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check(self.pos, bytes.len())?;
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Read an absolute 8-bit value without moving the cursor.
    #[inline]
    pub fn peek_u8_at(&self, at: usize) -> Result<u8> {
        self.check(at, 1)?;
        Ok(self.data[at])
    }

    /// Write an absolute 8-bit value without moving the cursor.
    #[inline]
    pub fn put_u8_at(&mut self, at: usize, value: u8) -> Result<()> {
        self.check(at, 1)?;
        self.data[at] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitives() {
        let mut buf = OctetBuffer::allocate(7);
        buf.write_u8(0xab).unwrap();
        buf.write_u16(0x1234).unwrap();
        buf.write_u32(0xdead_beef).unwrap();
        buf.seek(0);
        assert_eq!(buf.read_u8().unwrap(), 0xab);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0xdead_beef);
    }

    #[test]
    fn out_of_range_is_reported() {
        let mut buf = OctetBuffer::allocate(1);
        assert!(buf.write_u32(1).is_err());
    }

    #[test]
    fn put_and_get_bytes() {
        let mut buf = OctetBuffer::allocate(4);
        buf.put_bytes(&[1, 2, 3, 4]).unwrap();
        buf.seek(0);
        assert_eq!(buf.get_bytes(4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn wrap_preserves_bytes() {
        let buf = OctetBuffer::wrap(vec![9, 8, 7]);
        assert_eq!(buf.slice(), &[9, 8, 7]);
    }
}
