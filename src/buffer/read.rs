//! Cursor reads and random-access loads for [`ByteBuffer`]

use super::ByteBuffer;
use crate::constants::length;
use crate::encoding::Encoding;
use crate::error::{Error, Result};

impl ByteBuffer {
    #[inline]
    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferUnderflow {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_remaining(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.pos += n;
        Ok(())
    }

    // =========================================================================
    // Fixed-width reads
    // =========================================================================

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a boolean stored as one byte
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    /// Read a 16-bit signed integer
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit unsigned integer
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit float
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    // =========================================================================
    // Byte-slice reads
    // =========================================================================

    /// Borrow the next `n` bytes
    pub fn read_slice(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure_remaining(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    /// Copy the next `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.read_slice(n)?.to_vec())
    }

    /// Read bytes with a 1-byte length tag
    pub fn read_bytes_with_u8_len(&mut self) -> Result<Vec<u8>> {
        let n = self.read_u8()? as usize;
        self.read_bytes(n)
    }

    /// Read bytes with a 2-byte length tag
    pub fn read_bytes_with_u16_len(&mut self) -> Result<Vec<u8>> {
        let n = self.read_u16()? as usize;
        self.read_bytes(n)
    }

    /// Read bytes with a 4-byte length tag
    pub fn read_bytes_with_u32_len(&mut self) -> Result<Vec<u8>> {
        let n = self.read_u32()? as usize;
        self.read_bytes(n)
    }

    /// Read a zero-terminated byte string (terminator consumed, not returned)
    pub fn read_cstring(&mut self) -> Result<Vec<u8>> {
        let rest = self.remaining_slice();
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(Error::BufferUnderflow {
                needed: rest.len() + 1,
                available: rest.len(),
            })?;
        let out = rest[..end].to_vec();
        self.pos += end + 1;
        Ok(out)
    }

    /// Read a 4-byte length-tagged string in `encoding`
    pub fn read_string(&mut self, encoding: Encoding) -> Result<String> {
        let n = self.read_u32()? as usize;
        let bytes = self.read_slice(n)?;
        encoding.decode(bytes)
    }

    /// Read a cell value using the row length-tag convention; `None` is NULL
    pub fn read_cell(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_u16()? {
            length::NULL => Ok(None),
            length::LONG => {
                let n = self.read_u32()? as usize;
                self.read_bytes(n).map(Some)
            }
            n => self.read_bytes(n as usize).map(Some),
        }
    }

    // =========================================================================
    // Random-access loads (cursor unchanged)
    // =========================================================================

    /// Borrow `n` bytes at `offset`
    pub fn get_slice_at(&self, offset: usize, n: usize) -> Result<&[u8]> {
        self.check_range(offset, n)?;
        Ok(&self.data[offset..offset + n])
    }

    /// Load a byte at `offset`
    pub fn get_u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.get_slice_at(offset, 1)?[0])
    }

    /// Load a 16-bit unsigned integer at `offset`
    pub fn get_u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.get_slice_at(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Load a 32-bit signed integer at `offset`
    pub fn get_i32_at(&self, offset: usize) -> Result<i32> {
        let b = self.get_slice_at(offset, 4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Load a 32-bit unsigned integer at `offset`
    pub fn get_u32_at(&self, offset: usize) -> Result<u32> {
        Ok(self.get_i32_at(offset)? as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers() {
        let mut buf = ByteBuffer::from_slice(&[0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE, 0x2A]);
        assert_eq!(buf.read_u16().unwrap(), 0x0102);
        assert_eq!(buf.read_i32().unwrap(), -2);
        assert_eq!(buf.read_u8().unwrap(), 42);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_underflow_is_an_error() {
        let mut buf = ByteBuffer::from_slice(&[0x01]);
        let err = buf.read_u32().unwrap_err();
        assert!(matches!(err, Error::BufferUnderflow { needed: 4, available: 1 }));
        // Cursor unchanged on failure
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_get_at_does_not_move_cursor() {
        let buf = ByteBuffer::from_slice(&[0, 0, 0, 5, 0, 9]);
        assert_eq!(buf.get_i32_at(0).unwrap(), 5);
        assert_eq!(buf.get_u16_at(4).unwrap(), 9);
        assert_eq!(buf.position(), 0);
        assert!(buf.get_u16_at(5).is_err());
    }

    #[test]
    fn test_read_cstring() {
        let mut buf = ByteBuffer::from_slice(b"abc\0de");
        assert_eq!(buf.read_cstring().unwrap(), b"abc");
        assert_eq!(buf.remaining_slice(), b"de");
        assert!(buf.read_cstring().is_err());
    }

    #[test]
    fn test_read_cell_forms() {
        let mut buf = ByteBuffer::from_slice(&[0xFF, 0xFE, 0x00, 0x01, 0x07, 0xFF, 0xFF, 0, 0, 0, 1, 8]);
        assert_eq!(buf.read_cell().unwrap(), None);
        assert_eq!(buf.read_cell().unwrap(), Some(vec![7]));
        assert_eq!(buf.read_cell().unwrap(), Some(vec![8]));
    }

    #[test]
    fn test_read_string_gb18030() {
        let mut buf = ByteBuffer::new();
        buf.write_string("达梦", Encoding::Gb18030);
        assert_eq!(buf.len(), 4 + 4);
        assert_eq!(buf.read_string(Encoding::Gb18030).unwrap(), "达梦");
    }
}
