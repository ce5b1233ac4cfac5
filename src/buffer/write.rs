//! Tail writes and random-access stores for [`ByteBuffer`]
//!
//! Appends never fail; the buffer grows by the `max(2 * cap, len + n)`
//! policy. Stores at explicit offsets must land inside the live region.

use super::ByteBuffer;
use crate::constants::length;
use crate::encoding::Encoding;
use crate::error::{Error, Result};

impl ByteBuffer {
    // =========================================================================
    // Raw byte writes
    // =========================================================================

    /// Append a single byte
    pub fn write_u8(&mut self, value: u8) {
        self.ensure_writable(1);
        self.data.push(value);
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Append `n` zero bytes
    pub fn write_zeros(&mut self, n: usize) {
        self.ensure_writable(n);
        self.data.resize(self.data.len() + n, 0);
    }

    /// Extend or shrink the live region to exactly `len` bytes.
    ///
    /// New bytes are zero; shrinking follows [`ByteBuffer::truncate`].
    pub fn resize(&mut self, len: usize) {
        if len >= self.data.len() {
            self.write_zeros(len - self.data.len());
        } else {
            self.truncate(len);
        }
    }

    /// Shrink the live region to `k` bytes.
    ///
    /// Bytes in `[k, len)` are zeroed before the length drops, so stale
    /// plaintext can never be spliced into a later frame's padding. Capacity
    /// is never reduced and the cursor is clamped to the new length.
    pub fn truncate(&mut self, k: usize) {
        if k >= self.data.len() {
            return;
        }
        self.data[k..].fill(0);
        self.data.truncate(k);
        if self.pos > k {
            self.pos = k;
        }
    }

    /// Empty the buffer and rewind the cursor
    pub fn clear(&mut self) {
        self.truncate(0);
        self.pos = 0;
    }

    // =========================================================================
    // Big-endian integer writes
    // =========================================================================

    /// Append a signed byte
    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    /// Append a 16-bit unsigned integer
    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 16-bit signed integer
    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 32-bit unsigned integer
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 32-bit signed integer
    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 64-bit unsigned integer
    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 64-bit signed integer
    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 32-bit float
    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Append a 64-bit float
    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_be_bytes());
    }

    // =========================================================================
    // Length-prefixed writes
    // =========================================================================

    /// Append bytes with a 1-byte length tag
    pub fn write_bytes_with_u8_len(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u8::try_from(bytes.len()).map_err(|_| Error::DataTooLong(bytes.len()))?;
        self.write_u8(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Append bytes with a 2-byte length tag
    pub fn write_bytes_with_u16_len(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| Error::DataTooLong(bytes.len()))?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Append bytes with a 4-byte length tag
    pub fn write_bytes_with_u32_len(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Append a zero-terminated byte string
    pub fn write_cstring(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.write_u8(0);
    }

    /// Append a string converted to `encoding`, with a 4-byte length tag
    pub fn write_string(&mut self, s: &str, encoding: Encoding) {
        let bytes = encoding.encode(s);
        self.write_bytes_with_u32_len(&bytes);
    }

    /// Append a cell value using the row length-tag convention.
    ///
    /// `None` writes the NULL tag; values longer than the short maximum are
    /// written as the long tag plus a 4-byte length.
    pub fn write_cell(&mut self, value: Option<&[u8]>) {
        match value {
            None => self.write_u16(length::NULL),
            Some(bytes) if bytes.len() > length::SHORT_MAX => {
                self.write_u16(length::LONG);
                self.write_u32(bytes.len() as u32);
                self.write_bytes(bytes);
            }
            Some(bytes) => {
                self.write_u16(bytes.len() as u16);
                self.write_bytes(bytes);
            }
        }
    }

    // =========================================================================
    // Random-access stores (cursor and length unchanged)
    // =========================================================================

    /// Store a byte at `offset`
    pub fn set_u8_at(&mut self, offset: usize, value: u8) -> Result<()> {
        self.check_range(offset, 1)?;
        self.data[offset] = value;
        Ok(())
    }

    /// Store a 16-bit unsigned integer at `offset`
    pub fn set_u16_at(&mut self, offset: usize, value: u16) -> Result<()> {
        self.set_bytes_at(offset, &value.to_be_bytes())
    }

    /// Store a 32-bit signed integer at `offset`
    pub fn set_i32_at(&mut self, offset: usize, value: i32) -> Result<()> {
        self.set_bytes_at(offset, &value.to_be_bytes())
    }

    /// Store a 32-bit unsigned integer at `offset`
    pub fn set_u32_at(&mut self, offset: usize, value: u32) -> Result<()> {
        self.set_bytes_at(offset, &value.to_be_bytes())
    }

    /// Copy `bytes` over the live region starting at `offset`
    pub fn set_bytes_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_integers_big_endian() {
        let mut buf = ByteBuffer::new();
        buf.write_u16(0x0102);
        buf.write_i32(-2);
        buf.write_u64(1);
        assert_eq!(
            buf.as_slice(),
            &[1, 2, 0xFF, 0xFF, 0xFF, 0xFE, 0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_truncate_zeroes_tail() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.write_bytes(&[9; 10]);
        let cap = buf.capacity();
        buf.truncate(4);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.capacity(), cap);
        // The spare region re-exposed by a resize reads as zero
        buf.resize(10);
        assert_eq!(&buf.as_slice()[4..], &[0; 6]);
    }

    #[test]
    fn test_truncate_clamps_cursor() {
        let mut buf = ByteBuffer::from_slice(&[1, 2, 3, 4]);
        buf.set_position(4).unwrap();
        buf.truncate(2);
        assert_eq!(buf.position(), 2);
    }

    #[test]
    fn test_set_bytes_at_keeps_length() {
        let mut buf = ByteBuffer::new();
        buf.write_zeros(8);
        buf.set_bytes_at(2, &[7, 7]).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.as_slice()[2..4], [7, 7]);
        assert!(buf.set_bytes_at(7, &[1, 1]).is_err());
    }

    #[test]
    fn test_write_cell_tags() {
        let mut buf = ByteBuffer::new();
        buf.write_cell(None);
        buf.write_cell(Some(b"ab"));
        assert_eq!(buf.as_slice(), &[0xFF, 0xFE, 0, 2, b'a', b'b']);

        let long = vec![1u8; length::SHORT_MAX + 1];
        let mut buf = ByteBuffer::new();
        buf.write_cell(Some(&long));
        assert_eq!(&buf.as_slice()[..2], &[0xFF, 0xFF]);
        assert_eq!(buf.len(), 2 + 4 + long.len());
    }

    #[test]
    fn test_u8_length_overflow() {
        let mut buf = ByteBuffer::new();
        assert!(buf.write_bytes_with_u8_len(&[0; 300]).is_err());
    }
}
