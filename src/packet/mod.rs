//! Frame encoding/decoding
//!
//! This module handles the DM frame layer: the 64-byte header and the body
//! transforms applied between a message codec and the socket. Outbound bodies
//! go through compress → encrypt → length check → checksum; inbound bodies
//! are verified, decrypted and decompressed in the reverse order.

mod header;

pub use header::{xor_checksum, FrameHeader};

use crate::buffer::ByteBuffer;
use crate::compress::CompressAlgorithm;
use crate::constants::{CRC_LEN, HEADER_SIZE, MAX_BODY_LEN};
use crate::crypto::Cipher;
use crate::error::{Error, Result};

/// Frame integrity check negotiated at the capability exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// XOR of header bytes `[0, 51)` stored at offset 51
    #[default]
    Xor,
    /// CRC32 over header and body stored in the last four body bytes
    Crc32,
}

impl ChecksumMode {
    /// Decode the capability-exchange selector
    pub fn from_code(code: u8) -> Self {
        if code == crate::constants::checksum_mode::CRC32 {
            ChecksumMode::Crc32
        } else {
            ChecksumMode::Xor
        }
    }
}

/// Reject body lengths at or above the protocol ceiling
pub fn check_body_len(len: usize) -> Result<()> {
    if len >= MAX_BODY_LEN {
        return Err(Error::MsgTooLong { length: len });
    }
    Ok(())
}

fn frame_crc(header: &[u8], body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[..HEADER_SIZE]);
    hasher.update(body);
    hasher.finalize()
}

/// Per-session frame transform state
#[derive(Default)]
pub struct FrameCodec {
    checksum: ChecksumMode,
    compress: CompressAlgorithm,
    cipher: Option<Box<dyn Cipher>>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("checksum", &self.checksum)
            .field("compress", &self.compress)
            .field("cipher", &self.cipher.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl FrameCodec {
    /// Create a codec with XOR checksums, zlib and no cipher
    pub fn new() -> Self {
        Self::default()
    }

    /// Checksum mode in use
    pub fn checksum_mode(&self) -> ChecksumMode {
        self.checksum
    }

    /// Switch the checksum mode
    pub fn set_checksum_mode(&mut self, mode: ChecksumMode) {
        self.checksum = mode;
    }

    /// Set the compression algorithm for both directions
    pub fn set_compress_algorithm(&mut self, algorithm: CompressAlgorithm) {
        self.compress = algorithm;
    }

    /// Install the session cipher; bodies are encrypted from now on
    pub fn enable_encryption(&mut self, cipher: Box<dyn Cipher>) {
        self.cipher = Some(cipher);
    }

    /// Check if outbound bodies are encrypted
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Session cipher, if any
    pub fn cipher(&self) -> Option<&dyn Cipher> {
        self.cipher.as_deref()
    }

    /// Finish an outbound frame in place.
    ///
    /// `buf` holds 64 header bytes followed by the plain body. On return it
    /// holds the wire image and `header` reflects the stamped fields.
    pub fn seal(&self, buf: &mut ByteBuffer, header: &mut FrameHeader, compress: bool) -> Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Internal("frame buffer shorter than its header".into()));
        }
        let plain_len = buf.len() - HEADER_SIZE;
        let mut transformed: Option<Vec<u8>> = None;

        if compress && plain_len > 0 {
            let body = self.compress.compress(&buf.as_slice()[HEADER_SIZE..])?;
            header.compressed = true;
            transformed = Some(body);
        }

        if let Some(cipher) = &self.cipher {
            let body = match &transformed {
                Some(b) => cipher.encrypt(b, false)?,
                None => cipher.encrypt(&buf.as_slice()[HEADER_SIZE..], false)?,
            };
            header.encrypted = true;
            transformed = Some(body);
        }

        if let Some(body) = transformed {
            buf.truncate(HEADER_SIZE);
            buf.write_bytes(&body);
        }

        let crc = self.checksum == ChecksumMode::Crc32;
        let body_len = buf.len() - HEADER_SIZE + if crc { CRC_LEN } else { 0 };
        check_body_len(body_len)?;
        header.body_len = body_len as u32;
        header.checksum = 0;
        header.write_to(buf.as_mut_slice())?;

        if crc {
            let value = {
                let bytes = buf.as_slice();
                frame_crc(bytes, &bytes[HEADER_SIZE..])
            };
            buf.write_u32(value);
        } else {
            header.checksum = xor_checksum(buf.as_slice());
            buf.set_u8_at(crate::constants::header::CHECKSUM, header.checksum)?;
        }

        tracing::trace!(
            msg_type = header.msg_type,
            body_len = header.body_len,
            compressed = header.compressed,
            encrypted = header.encrypted,
            "sealed frame"
        );
        Ok(())
    }

    /// Verify and unwrap an inbound frame, returning the header and plain body
    pub fn open(&self, raw_header: &[u8], mut body: Vec<u8>) -> Result<(FrameHeader, Vec<u8>)> {
        let header = FrameHeader::parse(raw_header)?;
        if body.len() != header.body_len as usize {
            return Err(Error::Protocol(format!(
                "frame body is {} bytes, header announced {}",
                body.len(),
                header.body_len
            )));
        }

        match self.checksum {
            ChecksumMode::Xor => {
                if xor_checksum(raw_header) != header.checksum {
                    return Err(Error::MsgCheck);
                }
            }
            ChecksumMode::Crc32 => {
                if body.len() < CRC_LEN {
                    return Err(Error::MsgCheck);
                }
                let split = body.len() - CRC_LEN;
                let expected = u32::from_be_bytes([body[split], body[split + 1], body[split + 2], body[split + 3]]);
                if frame_crc(raw_header, &body[..split]) != expected {
                    return Err(Error::MsgCheck);
                }
                body.truncate(split);
            }
        }

        if header.encrypted && !body.is_empty() {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| Error::Protocol("encrypted frame before key exchange".into()))?;
            body = cipher.decrypt(&body, false)?;
        }

        if header.compressed && !body.is_empty() {
            body = self.compress.decompress(&body)?;
        }

        tracing::trace!(
            msg_type = header.msg_type,
            wire_len = header.body_len,
            body_len = body.len(),
            "opened frame"
        );
        Ok((header, body))
    }
}
