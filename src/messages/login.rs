//! Credential login
//!
//! Credentials are sent after the capability exchange. When a session key was
//! negotiated the username and password are encrypted with it in no-pad mode
//! and prefixed by their plaintext length. Certificate login replaces the
//! password with the client certificate, sealed the same way.

use crate::buffer::ByteBuffer;
use crate::constants::{limits, MessageType};
use crate::error::{Error, Result};
use crate::packet::FrameHeader;

use super::{Message, WireContext};

const CRED_PLAIN: u8 = 0;
const CRED_ENCRYPTED: u8 = 1;
const CRED_CERT: u8 = 2;

/// One credential field: the plaintext length and the bytes actually sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Length of the plaintext
    pub plain_len: i32,
    /// Plaintext or ciphertext
    pub bytes: Vec<u8>,
}

/// Login request
#[derive(Debug, Clone, Default)]
pub struct LoginMessage {
    /// Client type (legacy or new-client)
    pub client_type: u8,
    /// Isolation level code
    pub isolation: i32,
    /// Locale code
    pub locale: i32,
    /// Local UTC offset in minutes
    pub time_zone: i16,
    /// Open the session read-only
    pub read_only: bool,
    /// Session idle timeout in seconds
    pub session_timeout: i32,
    /// Restrict MPP execution to the local node
    pub mpp_local: bool,
    /// Session belongs to a read/write split pair
    pub rw_standby: bool,
    /// Client understands extended LOB locators
    pub new_lob: bool,
    /// OS authentication type (0 = none)
    pub os_auth_type: u8,
    /// Username
    pub user: Credential,
    /// Password
    pub password: Credential,
    /// Credentials were encrypted with the session key
    pub encrypted: bool,
    /// Certificate payload replacing the password
    pub cert: Option<Credential>,
    /// Application name
    pub app_name: String,
    /// Client OS name
    pub os_name: String,
    /// Client host name
    pub host_name: String,
    /// Read/write split flag
    pub rw_flag: u8,
}

impl LoginMessage {
    /// Validate and store credentials, encrypting them with `encrypt` when given
    pub fn set_credentials(
        &mut self,
        user: &[u8],
        password: &[u8],
        encrypt: Option<&dyn Fn(&[u8]) -> Result<Vec<u8>>>,
    ) -> Result<()> {
        if user.len() > limits::MAX_USERNAME_LEN {
            return Err(Error::UsernameTooLong(user.len()));
        }
        if password.len() > limits::MAX_PASSWORD_LEN {
            return Err(Error::PasswordTooLong(password.len()));
        }
        self.user = seal(user, encrypt)?;
        self.password = seal(password, encrypt)?;
        self.encrypted = encrypt.is_some();
        self.cert = None;
        Ok(())
    }

    /// Store the username and a client certificate in place of the password
    pub fn set_certificate(
        &mut self,
        user: &[u8],
        cert: &[u8],
        encrypt: &dyn Fn(&[u8]) -> Result<Vec<u8>>,
    ) -> Result<()> {
        if user.len() > limits::MAX_USERNAME_LEN {
            return Err(Error::UsernameTooLong(user.len()));
        }
        self.user = seal(user, Some(encrypt))?;
        self.cert = Some(seal(cert, Some(encrypt))?);
        self.password = Credential::default();
        self.encrypted = true;
        Ok(())
    }

    fn credential_mode(&self) -> u8 {
        if self.cert.is_some() {
            CRED_CERT
        } else if self.encrypted {
            CRED_ENCRYPTED
        } else {
            CRED_PLAIN
        }
    }

    /// Decode the request (used by test servers)
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        let mut msg = LoginMessage {
            client_type: buf.read_u8()?,
            isolation: buf.read_i32()?,
            locale: buf.read_i32()?,
            time_zone: buf.read_i16()?,
            read_only: buf.read_bool()?,
            session_timeout: buf.read_i32()?,
            mpp_local: buf.read_bool()?,
            rw_standby: buf.read_bool()?,
            new_lob: buf.read_bool()?,
            os_auth_type: buf.read_u8()?,
            ..Default::default()
        };
        let mode = buf.read_u8()?;
        msg.encrypted = mode != CRED_PLAIN;
        msg.user = Credential {
            plain_len: buf.read_i32()?,
            bytes: buf.read_bytes_with_u32_len()?,
        };
        let secret = Credential {
            plain_len: buf.read_i32()?,
            bytes: buf.read_bytes_with_u32_len()?,
        };
        if mode == CRED_CERT {
            msg.cert = Some(secret);
        } else {
            msg.password = secret;
        }
        msg.app_name = buf.read_string(ctx.encoding)?;
        msg.os_name = buf.read_string(ctx.encoding)?;
        msg.host_name = buf.read_string(ctx.encoding)?;
        msg.rw_flag = buf.read_u8()?;
        Ok(msg)
    }
}

fn seal(plain: &[u8], encrypt: Option<&dyn Fn(&[u8]) -> Result<Vec<u8>>>) -> Result<Credential> {
    let bytes = match encrypt {
        Some(f) => f(plain)?,
        None => plain.to_vec(),
    };
    Ok(Credential {
        plain_len: plain.len() as i32,
        bytes,
    })
}

/// Standby endpoint advertised at login
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandbyInfo {
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
    /// Number of standbys in the group
    pub count: i32,
}

/// Login response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginReply {
    /// Maximum row size in bytes
    pub max_row_size: i32,
    /// DDL statements commit implicitly
    pub ddl_autocommit: bool,
    /// Effective isolation code
    pub isolation: i32,
    /// Identifiers are case sensitive
    pub case_sensitive: bool,
    /// Backslash is an escape character
    pub backslash_escape: bool,
    /// Server mode code
    pub server_mode: i32,
    /// Server status code
    pub server_status: i32,
    /// Server accepts constant-parameter optimization hints
    pub const_para_opt: bool,
    /// Server time zone offset in minutes
    pub db_time_zone: i16,
    /// Extended LOB locators are in effect
    pub new_lob: bool,
    /// Suggested prefetch buffer in bytes
    pub buf_prefetch: i32,
    /// Password lifetime remainder in days
    pub lifetime: i32,
    /// Endpoint is a DSC control node
    pub dsc_control: bool,
    /// Capability bits (execute2, malini2, lobEmptyCompOrcl)
    pub capabilities: u8,
    /// Instance name
    pub instance_name: String,
    /// Current schema
    pub schema: String,
    /// Previous login address
    pub last_login_ip: String,
    /// Previous login time
    pub last_login_time: String,
    /// Failed attempts since the previous login
    pub failed_attempts: i32,
    /// Login warnings
    pub warnings: String,
    /// Database guid
    pub guid: String,
    /// Database name
    pub db_name: String,
    /// Standby endpoint for read/write split
    pub standby: Option<StandbyInfo>,
    /// Server session id
    pub session_id: i64,
    /// Oracle-compatible date, time and timestamp formats
    pub formats: Option<(String, String, String)>,
}

/// Capability bit: server accepts `Execute2`
pub const CAP_EXECUTE2: u8 = 0x01;
/// Capability bit: server uses the malini2 plan cache protocol
pub const CAP_MALINI2: u8 = 0x02;
/// Capability bit: empty LOBs compare like Oracle
pub const CAP_LOB_EMPTY_COMP_ORCL: u8 = 0x04;

impl LoginReply {
    /// Decode the reply
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        let enc = ctx.encoding;
        let mut reply = LoginReply {
            max_row_size: buf.read_i32()?,
            ddl_autocommit: buf.read_bool()?,
            isolation: buf.read_i32()?,
            case_sensitive: buf.read_bool()?,
            backslash_escape: buf.read_bool()?,
            server_mode: buf.read_i32()?,
            server_status: buf.read_i32()?,
            const_para_opt: buf.read_bool()?,
            db_time_zone: buf.read_i16()?,
            new_lob: buf.read_bool()?,
            buf_prefetch: buf.read_i32()?,
            lifetime: buf.read_i32()?,
            dsc_control: buf.read_bool()?,
            capabilities: buf.read_u8()?,
            instance_name: buf.read_string(enc)?,
            schema: buf.read_string(enc)?,
            last_login_ip: buf.read_string(enc)?,
            last_login_time: buf.read_string(enc)?,
            failed_attempts: buf.read_i32()?,
            warnings: buf.read_string(enc)?,
            guid: buf.read_string(enc)?,
            db_name: buf.read_string(enc)?,
            ..Default::default()
        };
        if buf.read_bool()? {
            let host = buf.read_string(enc)?;
            let port = buf.read_i32()?;
            let count = buf.read_i32()?;
            reply.standby = Some(StandbyInfo {
                host,
                port: u16::try_from(port)
                    .map_err(|_| Error::Protocol(format!("invalid standby port {port}")))?,
                count,
            });
        }
        reply.session_id = buf.read_i64()?;
        if buf.read_bool()? {
            reply.formats = Some((buf.read_string(enc)?, buf.read_string(enc)?, buf.read_string(enc)?));
        }
        if !(0..=2).contains(&reply.server_mode) {
            return Err(Error::InvalidServerMode(reply.server_mode.to_string()));
        }
        Ok(reply)
    }

    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext) {
        let enc = ctx.encoding;
        buf.write_i32(self.max_row_size);
        buf.write_u8(self.ddl_autocommit as u8);
        buf.write_i32(self.isolation);
        buf.write_u8(self.case_sensitive as u8);
        buf.write_u8(self.backslash_escape as u8);
        buf.write_i32(self.server_mode);
        buf.write_i32(self.server_status);
        buf.write_u8(self.const_para_opt as u8);
        buf.write_i16(self.db_time_zone);
        buf.write_u8(self.new_lob as u8);
        buf.write_i32(self.buf_prefetch);
        buf.write_i32(self.lifetime);
        buf.write_u8(self.dsc_control as u8);
        buf.write_u8(self.capabilities);
        for s in [
            &self.instance_name,
            &self.schema,
            &self.last_login_ip,
            &self.last_login_time,
        ] {
            buf.write_string(s, enc);
        }
        buf.write_i32(self.failed_attempts);
        buf.write_string(&self.warnings, enc);
        buf.write_string(&self.guid, enc);
        buf.write_string(&self.db_name, enc);
        match &self.standby {
            Some(s) => {
                buf.write_u8(1);
                buf.write_string(&s.host, enc);
                buf.write_i32(s.port as i32);
                buf.write_i32(s.count);
            }
            None => buf.write_u8(0),
        }
        buf.write_i64(self.session_id);
        match &self.formats {
            Some((d, t, ts)) => {
                buf.write_u8(1);
                buf.write_string(d, enc);
                buf.write_string(t, enc);
                buf.write_string(ts, enc);
            }
            None => buf.write_u8(0),
        }
    }
}

impl Message for LoginMessage {
    type Output = LoginReply;

    fn msg_type(&self) -> MessageType {
        MessageType::Login
    }

    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()> {
        buf.write_u8(self.client_type);
        buf.write_i32(self.isolation);
        buf.write_i32(self.locale);
        buf.write_i16(self.time_zone);
        buf.write_u8(self.read_only as u8);
        buf.write_i32(self.session_timeout);
        buf.write_u8(self.mpp_local as u8);
        buf.write_u8(self.rw_standby as u8);
        buf.write_u8(self.new_lob as u8);
        buf.write_u8(self.os_auth_type);

        buf.write_u8(self.credential_mode());
        let secret = self.cert.as_ref().unwrap_or(&self.password);
        for field in [&self.user, secret] {
            buf.write_i32(field.plain_len);
            buf.write_bytes_with_u32_len(&field.bytes);
        }

        buf.write_string(&self.app_name, ctx.encoding);
        buf.write_string(&self.os_name, ctx.encoding);
        buf.write_string(&self.host_name, ctx.encoding);
        buf.write_u8(self.rw_flag);
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<LoginReply> {
        LoginReply::read(body, ctx)
    }
}
