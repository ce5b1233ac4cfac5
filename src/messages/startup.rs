//! Capability exchange
//!
//! The first frame on every socket. The client announces its version, the
//! encryption and compression it wants and its DH public key; the server
//! answers with what it will actually use.

use crate::buffer::ByteBuffer;
use crate::constants::{encrypt_mode, MessageType, CLIENT_VERSION, MIN_SERVER_VERSION};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::packet::FrameHeader;

use super::{Message, WireContext};

/// Capability-exchange request
#[derive(Debug, Clone)]
pub struct StartupMessage {
    /// Client product version
    pub client_version: String,
    /// Client asks for symmetric encryption
    pub encrypt: bool,
    /// Compression option code
    pub compress: u8,
    /// Compression algorithm id
    pub compress_id: u8,
    /// Client intends to log in with a certificate
    pub cert: bool,
    /// Client speaks the new login format
    pub new_client: bool,
    /// Message protocol version
    pub msg_version: i32,
    /// DH public value; empty when no key exchange is wanted
    pub dh_public: Vec<u8>,
}

impl Default for StartupMessage {
    fn default() -> Self {
        Self {
            client_version: CLIENT_VERSION.to_string(),
            encrypt: false,
            compress: 0,
            compress_id: 0,
            cert: false,
            new_client: true,
            msg_version: crate::constants::MSG_VERSION,
            dh_public: Vec::new(),
        }
    }
}

/// Capability-exchange response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReply {
    /// Server encryption mode
    pub encrypt_mode: i32,
    /// Server requires TLS
    pub ssl: bool,
    /// Server product series
    pub server_series: i32,
    /// Server character set code
    pub encoding: i32,
    /// Negotiated compression option
    pub compress: u8,
    /// Negotiated compression algorithm id
    pub compress_id: u8,
    /// Server sends BDTA result sets
    pub bdta: bool,
    /// Checksum mode selector
    pub checksum_mode: u8,
    /// Server accepted the new login format
    pub new_client: bool,
    /// Negotiated message version
    pub msg_version: i32,
    /// Server product version
    pub server_version: String,
    /// Server DH public value
    pub dh_public: Vec<u8>,
    /// Encryption type selector
    pub encrypt_type: i32,
    /// Hash type selector
    pub hash_type: i32,
    /// Certificate login path advertised by the server
    pub login_cert_path: String,
}

impl StartupReply {
    /// Check if symmetric encryption is in effect
    pub fn encryption_enabled(&self) -> bool {
        self.encrypt_mode != encrypt_mode::NONE
    }

    /// Check if the server accepts certificate login
    pub fn cert_login(&self) -> bool {
        !self.login_cert_path.is_empty()
    }

    /// The DH key block follows when encryption, TLS or certificate login is on
    fn carries_key(&self) -> bool {
        self.encryption_enabled() || self.ssl || self.cert_login()
    }

    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_i32(self.encrypt_mode);
        buf.write_u8(self.ssl as u8);
        buf.write_i32(self.server_series);
        buf.write_i32(self.encoding);
        buf.write_u8(self.compress);
        buf.write_u8(self.compress_id);
        buf.write_u8(self.bdta as u8);
        buf.write_u8(self.checksum_mode);
        buf.write_u8(self.new_client as u8);
        buf.write_i32(self.msg_version);
        buf.write_string(&self.server_version, Encoding::Utf8);
        buf.write_string(&self.login_cert_path, Encoding::Utf8);
        if self.carries_key() {
            buf.write_bytes_with_u32_len(&self.dh_public);
            buf.write_i32(self.encrypt_type);
            buf.write_i32(self.hash_type);
        }
    }

    /// Decode the reply
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let mut reply = StartupReply {
            encrypt_mode: buf.read_i32()?,
            ssl: buf.read_bool()?,
            server_series: buf.read_i32()?,
            encoding: buf.read_i32()?,
            compress: buf.read_u8()?,
            compress_id: buf.read_u8()?,
            bdta: buf.read_bool()?,
            checksum_mode: buf.read_u8()?,
            new_client: buf.read_bool()?,
            msg_version: buf.read_i32()?,
            server_version: buf.read_string(Encoding::Utf8)?,
            login_cert_path: buf.read_string(Encoding::Utf8)?,
            ..Default::default()
        };
        if reply.carries_key() {
            reply.dh_public = buf.read_bytes_with_u32_len()?;
            reply.encrypt_type = buf.read_i32()?;
            reply.hash_type = buf.read_i32()?;
        }
        Ok(reply)
    }
}

impl StartupMessage {
    /// Decode the request (used by test servers)
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        Ok(Self {
            client_version: buf.read_string(Encoding::Utf8)?,
            encrypt: buf.read_bool()?,
            compress: buf.read_u8()?,
            compress_id: buf.read_u8()?,
            cert: buf.read_bool()?,
            new_client: buf.read_bool()?,
            msg_version: buf.read_i32()?,
            dh_public: buf.read_bytes_with_u32_len()?,
        })
    }
}

impl Message for StartupMessage {
    type Output = StartupReply;

    fn msg_type(&self) -> MessageType {
        MessageType::Startup
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_string(&self.client_version, Encoding::Utf8);
        buf.write_u8(self.encrypt as u8);
        buf.write_u8(self.compress);
        buf.write_u8(self.compress_id);
        buf.write_u8(self.cert as u8);
        buf.write_u8(self.new_client as u8);
        buf.write_i32(self.msg_version);
        buf.write_bytes_with_u32_len(&self.dh_public);
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<StartupReply> {
        let reply = StartupReply::read(body)?;
        if !version_at_least(&reply.server_version, MIN_SERVER_VERSION) {
            return Err(Error::ServerVersionTooOld {
                version: reply.server_version,
                minimum: MIN_SERVER_VERSION.to_string(),
            });
        }
        Ok(reply)
    }
}

/// Compare dotted version strings component-wise; missing or non-numeric parts count as 0
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.trim()
            .split(['.', '-'])
            .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>().parse().unwrap_or(0))
            .collect()
    };
    let (mut a, mut b) = (parse(version), parse(minimum));
    let n = a.len().max(b.len());
    a.resize(n, 0);
    b.resize(n, 0);
    a >= b
}
