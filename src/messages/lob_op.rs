//! LOB sub-protocol: length, read, write and truncate on a handle

use crate::buffer::ByteBuffer;
use crate::constants::{lob_op, MessageType};
use crate::error::{Error, Result};
use crate::packet::FrameHeader;
use crate::types::LobLocator;

use super::{Message, WireContext};

/// Operation on a LOB handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobOp {
    /// Current length
    GetLength,
    /// Read `len` units starting at `offset`
    GetData {
        /// Zero-based offset
        offset: i64,
        /// Units to read
        len: i32,
    },
    /// Write one chunk at `offset`
    SetData {
        /// First/last chunk flags
        flags: u8,
        /// Zero-based offset
        offset: i64,
        /// Chunk bytes
        data: Vec<u8>,
    },
    /// Cut the value to `new_len`
    Truncate {
        /// New length
        new_len: i64,
    },
}

impl LobOp {
    fn code(&self) -> u8 {
        match self {
            LobOp::GetLength => lob_op::GET_LENGTH,
            LobOp::GetData { .. } => lob_op::GET_DATA,
            LobOp::SetData { .. } => lob_op::SET_DATA,
            LobOp::Truncate { .. } => lob_op::TRUNCATE,
        }
    }
}

/// Decoded LOB operation reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobReply {
    /// Length of the value
    Length(i64),
    /// A slice of the value
    Data {
        /// No more data past this slice
        read_over: bool,
        /// Characters in the slice (CLOB)
        char_len: i32,
        /// Slice bytes
        bytes: Vec<u8>,
    },
    /// Bytes accepted by the server
    Written(i32),
    /// Length after truncation
    Truncated(i64),
}

impl LobReply {
    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, new_lob: bool) {
        match self {
            LobReply::Length(n) if new_lob => buf.write_i64(*n),
            LobReply::Length(n) => buf.write_i32(*n as i32),
            LobReply::Data {
                read_over,
                char_len,
                bytes,
            } => {
                buf.write_u8(*read_over as u8);
                buf.write_i32(*char_len);
                buf.write_bytes_with_u32_len(bytes);
            }
            LobReply::Written(n) => buf.write_i32(*n),
            LobReply::Truncated(n) => buf.write_i64(*n),
        }
    }
}

/// One LOB operation request
#[derive(Debug, Clone)]
pub struct LobOpMessage {
    /// Handle operated on
    pub locator: LobLocator,
    /// Operation
    pub op: LobOp,
}

impl LobOpMessage {
    /// Create a request
    pub fn new(locator: &LobLocator, op: LobOp) -> Self {
        Self {
            locator: locator.clone(),
            op,
        }
    }

    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        let code = buf.read_u8()?;
        let is_clob = buf.read_bool()?;
        let locator = LobLocator::read_handle(buf, is_clob, ctx.new_lob)?;
        let op = match code {
            lob_op::GET_LENGTH => LobOp::GetLength,
            lob_op::GET_DATA => LobOp::GetData {
                offset: buf.read_i64()?,
                len: buf.read_i32()?,
            },
            lob_op::SET_DATA => LobOp::SetData {
                flags: buf.read_u8()?,
                offset: buf.read_i64()?,
                data: buf.read_bytes_with_u32_len()?,
            },
            lob_op::TRUNCATE => LobOp::Truncate {
                new_len: buf.read_i64()?,
            },
            other => return Err(Error::Protocol(format!("unknown lob operation {other}"))),
        };
        Ok(Self { locator, op })
    }
}

impl Message for LobOpMessage {
    type Output = LobReply;

    fn msg_type(&self) -> MessageType {
        MessageType::LobOp
    }

    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()> {
        self.locator.check_live()?;
        buf.write_u8(self.op.code());
        buf.write_u8(self.locator.is_clob as u8);
        self.locator.write_handle(buf, ctx.new_lob);
        match &self.op {
            LobOp::GetLength => {}
            LobOp::GetData { offset, len } => {
                if *offset < 0 || *len < 0 {
                    return Err(Error::InvalidLengthOrOffset);
                }
                buf.write_i64(*offset);
                buf.write_i32(*len);
            }
            LobOp::SetData { flags, offset, data } => {
                if *offset < 0 {
                    return Err(Error::InvalidLengthOrOffset);
                }
                buf.write_u8(*flags);
                buf.write_i64(*offset);
                buf.write_bytes_with_u32_len(data);
            }
            LobOp::Truncate { new_len } => {
                if *new_len < 0 {
                    return Err(Error::InvalidLengthOrOffset);
                }
                buf.write_i64(*new_len);
            }
        }
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<LobReply> {
        Ok(match self.op {
            LobOp::GetLength if ctx.new_lob => LobReply::Length(body.read_i64()?),
            LobOp::GetLength => LobReply::Length(body.read_i32()? as i64),
            LobOp::GetData { .. } => LobReply::Data {
                read_over: body.read_bool()?,
                char_len: body.read_i32()?,
                bytes: body.read_bytes_with_u32_len()?,
            },
            LobOp::SetData { .. } => LobReply::Written(body.read_i32()?),
            LobOp::Truncate { .. } => LobReply::Truncated(body.read_i64()?),
        })
    }
}
