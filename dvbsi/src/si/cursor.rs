//! Bounds-checked reader used by every table and descriptor decoder.
//!
//! All multi-byte fields are big-endian. Every read checks the remaining
//! length first and reports [`SiError::Truncated`] instead of panicking.

use bytes::Buf;

use crate::error::{Result, SiError};

/// Cursor over a section body.
#[derive(Debug, Clone)]
pub struct SectionCursor<'a> {
    buf: &'a [u8],
}

impl<'a> SectionCursor<'a> {
    /// Create a cursor over the given bytes.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether everything has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unread bytes, without consuming them.
    pub fn peek_rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(SiError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a 13-bit PID (3 reserved bits masked off).
    pub fn read_pid(&mut self) -> Result<u16> {
        Ok(self.read_u16()? & 0x1FFF)
    }

    /// Read a 12-bit length field (4 reserved/flag bits masked off).
    pub fn read_length_12(&mut self) -> Result<usize> {
        Ok((self.read_u16()? & 0x0FFF) as usize)
    }

    /// Read a fixed-size array (timestamps, language codes, ...).
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Carve out a sub-cursor for a length-prefixed loop.
    pub fn sub_cursor(&mut self, len: usize) -> Result<SectionCursor<'a>> {
        self.read_bytes(len).map(SectionCursor::new)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }
}

/// Extract the inclusive bit range `msb..=lsb` from a byte.
pub fn bits(value: u8, msb: u8, lsb: u8) -> u8 {
    let width = msb - lsb + 1;
    let mask = if width >= 8 { 0xFF } else { (1u8 << width) - 1 };
    (value >> lsb) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let data = [0x12, 0x34, 0xE0, 0x20, 0xF0, 0x05, 0xAA];
        let mut cursor = SectionCursor::new(&data);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_pid().unwrap(), 0x0020);
        assert_eq!(cursor.read_length_12().unwrap(), 5);
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.read_u8().unwrap(), 0xAA);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_read_reports_needed() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor = SectionCursor::new(&data);
        match cursor.read_u32() {
            Err(SiError::Truncated { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Failed reads do not consume anything.
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn test_sub_cursor_is_bounded() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut cursor = SectionCursor::new(&data);
        let mut inner = cursor.sub_cursor(2).unwrap();
        assert_eq!(inner.read_u16().unwrap(), 0x0102);
        assert!(inner.read_u8().is_err());
        assert_eq!(cursor.read_u16().unwrap(), 0x0304);
    }

    #[test]
    fn test_bits() {
        assert_eq!(bits(0b1010_0110, 7, 6), 0b10);
        assert_eq!(bits(0b1010_0110, 3, 0), 0b0110);
        assert_eq!(bits(0b1010_0110, 0, 0), 0);
        assert_eq!(bits(0xFF, 7, 0), 0xFF);
    }
}
