//! Frame body compression
//!
//! A compressed body is `[uncompressedLen:u32][compressed bytes]`. The
//! algorithm id is negotiated at the capability exchange.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Compression algorithms the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressAlgorithm {
    /// zlib deflate (id 0)
    #[default]
    Zlib,
    /// Snappy raw format (id 1)
    Snappy,
}

impl CompressAlgorithm {
    /// Look up the algorithm by wire id
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressAlgorithm::Zlib),
            1 => Ok(CompressAlgorithm::Snappy),
            other => Err(Error::Protocol(format!("unknown compress id {other}"))),
        }
    }

    /// Wire id
    pub fn id(&self) -> u8 {
        match self {
            CompressAlgorithm::Zlib => 0,
            CompressAlgorithm::Snappy => 1,
        }
    }

    /// Compress `data`, prefixing the uncompressed length
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 8);
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        match self {
            CompressAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(out, Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressAlgorithm::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(data)
                    .map_err(|e| Error::Protocol(format!("snappy compression failed: {e}")))?;
                out.extend_from_slice(&compressed);
                Ok(out)
            }
        }
    }

    /// Decompress a length-prefixed body
    pub fn decompress(&self, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() < 4 {
            return Err(Error::Protocol("compressed body shorter than its length prefix".into()));
        }
        let expected = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let payload = &body[4..];
        let out = match self {
            CompressAlgorithm::Zlib => {
                let mut out = Vec::with_capacity(expected);
                ZlibDecoder::new(payload).read_to_end(&mut out)?;
                out
            }
            CompressAlgorithm::Snappy => snap::raw::Decoder::new()
                .decompress_vec(payload)
                .map_err(|e| Error::Protocol(format!("snappy decompression failed: {e}")))?,
        };
        if out.len() != expected {
            return Err(Error::Protocol(format!(
                "decompressed {} bytes, header announced {}",
                out.len(),
                expected
            )));
        }
        Ok(out)
    }
}

/// Outbound compression policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressMode {
    /// Never compress
    #[default]
    Off,
    /// Compress every non-empty eligible body
    Always,
    /// Compress bodies above the threshold when the server is remote
    Auto,
}

impl CompressMode {
    /// Wire code sent in the capability exchange
    pub fn code(&self) -> u8 {
        match self {
            CompressMode::Off => 0,
            CompressMode::Always => 1,
            CompressMode::Auto => 2,
        }
    }

    /// Decode the wire code
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => CompressMode::Always,
            2 => CompressMode::Auto,
            _ => CompressMode::Off,
        }
    }

    /// Decide whether a body of `body_len` bytes is compressed on send
    pub fn should_compress(&self, body_len: usize, threshold: usize, server_is_local: bool) -> bool {
        match self {
            CompressMode::Off => false,
            CompressMode::Always => body_len > 0,
            CompressMode::Auto => body_len > threshold && !server_is_local,
        }
    }
}

impl std::str::FromStr for CompressMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "off" | "false" | "no" => Ok(CompressMode::Off),
            "1" | "always" | "true" | "yes" | "on" => Ok(CompressMode::Always),
            "2" | "auto" => Ok(CompressMode::Auto),
            _ => Err(Error::InvalidConnectionString(format!("invalid compress value: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_body_layout() {
        let data = vec![b'x'; 10_000];
        let body = CompressAlgorithm::Zlib.compress(&data).unwrap();
        assert_eq!(&body[..4], &10_000u32.to_be_bytes());
        assert!(body.len() < data.len());
        assert_eq!(CompressAlgorithm::Zlib.decompress(&body).unwrap(), data);
    }

    #[test]
    fn test_snappy_body() {
        let data = b"select 1 from dual where 1 = 1 and 1 = 1".repeat(50);
        let body = CompressAlgorithm::Snappy.compress(&data).unwrap();
        assert_eq!(CompressAlgorithm::Snappy.decompress(&body).unwrap(), data);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut body = CompressAlgorithm::Zlib.compress(b"abc").unwrap();
        body[3] = 9;
        assert!(CompressAlgorithm::Zlib.decompress(&body).is_err());
    }

    #[test]
    fn test_policy() {
        assert!(!CompressMode::Off.should_compress(100_000, 8192, false));
        assert!(CompressMode::Always.should_compress(1, 8192, true));
        assert!(!CompressMode::Always.should_compress(0, 8192, true));
        assert!(CompressMode::Auto.should_compress(8193, 8192, false));
        assert!(!CompressMode::Auto.should_compress(8193, 8192, true));
        assert!(!CompressMode::Auto.should_compress(8192, 8192, false));
    }
}
