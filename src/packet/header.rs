//! Frame header encoding/decoding
//!
//! Every DM frame starts with a fixed 64-byte header:
//!
//! ```text
//!  0        4      6          10         14         18  19       50  51   64
//! +--------+------+----------+----------+----------+---+---+...+---+---+...+
//! | stmt / | type | body len | misc     | exec id  |enc|flg|   |cmp|xor|   |
//! | errcode|      |          |          |          |   |   |   |   |   |   |
//! +--------+------+----------+----------+----------+---+---+...+---+---+...+
//! ```
//!
//! Bytes not named above are zero on requests and ignored on responses.

use crate::constants::{header, MessageType, HEADER_SIZE};
use crate::error::{Error, Result};

/// Decoded 64-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Statement id on requests; error code on responses
    pub stmt_id: i32,
    /// Raw logical message type
    pub msg_type: u16,
    /// Body length after compression and encryption (includes CRC trailer)
    pub body_len: u32,
    /// Server-attached misc word
    pub misc: i32,
    /// Rowset / exec id
    pub exec_id: i32,
    /// Body is encrypted
    pub encrypted: bool,
    /// Message-specific flag byte
    pub flags: u8,
    /// Body is compressed
    pub compressed: bool,
    /// XOR checksum byte (legacy mode)
    pub checksum: u8,
}

impl FrameHeader {
    /// Create a request header
    pub fn new(msg_type: MessageType, stmt_id: i32) -> Self {
        Self {
            stmt_id,
            msg_type: msg_type as u16,
            ..Default::default()
        }
    }

    /// Parse a header from the first 64 bytes of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::BufferUnderflow {
                needed: HEADER_SIZE,
                available: data.len(),
            });
        }
        let i32_at = |off: usize| i32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        Ok(Self {
            stmt_id: i32_at(header::STMT_ID),
            msg_type: u16::from_be_bytes([data[header::MSG_TYPE], data[header::MSG_TYPE + 1]]),
            body_len: i32_at(header::BODY_LEN) as u32,
            misc: i32_at(header::MISC),
            exec_id: i32_at(header::EXEC_ID),
            encrypted: data[header::ENCRYPTED] != 0,
            flags: data[header::FLAGS],
            compressed: data[header::COMPRESSED] != 0,
            checksum: data[header::CHECKSUM],
        })
    }

    /// Write the named fields into `out[0..64)`; other bytes are left untouched
    pub fn write_to(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_SIZE {
            return Err(Error::BufferUnderflow {
                needed: HEADER_SIZE,
                available: out.len(),
            });
        }
        out[header::STMT_ID..header::STMT_ID + 4].copy_from_slice(&self.stmt_id.to_be_bytes());
        out[header::MSG_TYPE..header::MSG_TYPE + 2].copy_from_slice(&self.msg_type.to_be_bytes());
        out[header::BODY_LEN..header::BODY_LEN + 4].copy_from_slice(&self.body_len.to_be_bytes());
        out[header::MISC..header::MISC + 4].copy_from_slice(&self.misc.to_be_bytes());
        out[header::EXEC_ID..header::EXEC_ID + 4].copy_from_slice(&self.exec_id.to_be_bytes());
        out[header::ENCRYPTED] = self.encrypted as u8;
        out[header::FLAGS] = self.flags;
        out[header::COMPRESSED] = self.compressed as u8;
        out[header::CHECKSUM] = self.checksum;
        Ok(())
    }

    /// Encode to a fresh 64-byte array
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        // Fixed-size target always fits
        let _ = self.write_to(&mut out);
        out
    }

    /// Typed message type
    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::try_from(self.msg_type)
    }

    /// Error code carried by a response header
    pub fn error_code(&self) -> i32 {
        self.stmt_id
    }
}

/// XOR of header bytes `[0, 51)`
pub fn xor_checksum(header_bytes: &[u8]) -> u8 {
    header_bytes[..header::CHECKSUM.min(header_bytes.len())]
        .iter()
        .fold(0u8, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut h = FrameHeader::new(MessageType::Execute, 0x0102_0304);
        h.body_len = 0x10;
        h.compressed = true;
        let bytes = h.to_bytes();
        assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..6], &[0, 6]);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 0x10]);
        assert_eq!(bytes[50], 1);
        assert_eq!(FrameHeader::parse(&bytes).unwrap(), h);
    }

    #[test]
    fn test_parse_short() {
        assert!(FrameHeader::parse(&[0u8; 63]).is_err());
    }

    #[test]
    fn test_xor_excludes_checksum_byte() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = 0x0F;
        bytes[4] = 0xF0;
        bytes[51] = 0xAA;
        bytes[60] = 0x55;
        assert_eq!(xor_checksum(&bytes), 0xFF);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut h = FrameHeader::default();
        h.msg_type = 999;
        assert!(h.message_type().is_err());
    }
}
