//! Fetch message for retrieving the next window of a result set

use crate::buffer::ByteBuffer;
use crate::constants::{limits, MessageType};
use crate::error::{Error, Result};
use crate::packet::FrameHeader;

use super::execute::{read_rows, write_rows};
use super::rowset::RawRow;
use super::{ColumnInfo, Message, WireContext};

/// Fetch a row window starting at an absolute row index
#[derive(Debug, Clone, Default)]
pub struct FetchMessage {
    /// Statement handle owning the cursor
    pub stmt_id: i32,
    /// Absolute index of the first row wanted
    pub row_index: i64,
    /// Maximum number of rows
    pub max_count: i32,
    /// Suggested response size in bytes (clamped on send)
    pub prefetch_bytes: i32,
    /// Columns of the result set
    pub columns: Vec<ColumnInfo>,
}

/// Fetch reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReply {
    /// Rows still on the server after this window
    pub remaining: i64,
    /// Rows were BDTA encoded
    pub bdta: bool,
    /// The window
    pub rows: Vec<RawRow>,
}

impl FetchReply {
    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, columns: &[ColumnInfo]) -> Result<()> {
        buf.write_i64(self.remaining);
        buf.write_i16(columns.len() as i16);
        buf.write_u8(self.bdta as u8);
        write_rows(buf, columns, &self.rows, self.bdta)
    }
}

impl FetchMessage {
    /// Create a fetch request
    pub fn new(stmt_id: i32, row_index: i64, max_count: i32, prefetch_bytes: i32, columns: Vec<ColumnInfo>) -> Self {
        Self {
            stmt_id,
            row_index,
            max_count,
            prefetch_bytes,
            columns,
        }
    }

    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        Ok(Self {
            row_index: buf.read_i64()?,
            max_count: buf.read_i32()?,
            stmt_id: buf.read_i32()?,
            prefetch_bytes: buf.read_i32()?,
            columns: Vec::new(),
        })
    }
}

impl Message for FetchMessage {
    type Output = FetchReply;

    fn msg_type(&self) -> MessageType {
        MessageType::Fetch
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_i64(self.row_index);
        buf.write_i32(self.max_count);
        buf.write_i32(self.stmt_id);
        buf.write_i32(self.prefetch_bytes.clamp(limits::PREFETCH_MIN, limits::PREFETCH_MAX));
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<FetchReply> {
        let remaining = body.read_i64()?;
        let col_count = body.read_i16()?;
        if col_count as usize != self.columns.len() {
            return Err(Error::Protocol(format!(
                "fetch returned {col_count} columns, expected {}",
                self.columns.len()
            )));
        }
        let bdta = body.read_bool()?;
        let rows = read_rows(body, &self.columns, bdta)?;
        tracing::trace!(stmt_id = self.stmt_id, rows = rows.len(), remaining, "fetched window");
        Ok(FetchReply { remaining, bdta, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::col_type;

    #[test]
    fn test_prefetch_clamped() {
        let ctx = WireContext::default();
        for (asked, sent) in [(1, 32), (4096, 4096), (1 << 20, 65536)] {
            let msg = FetchMessage::new(1, 0, 100, asked, Vec::new());
            let mut buf = ByteBuffer::new();
            msg.encode(&mut buf, &ctx).unwrap();
            assert_eq!(FetchMessage::read(&mut buf).unwrap().prefetch_bytes, sent);
        }
    }

    #[test]
    fn test_fetch_reply_rows() {
        let ctx = WireContext::default();
        let cols = vec![ColumnInfo::new("N", col_type::BIGINT)];
        let reply = FetchReply {
            remaining: 5,
            bdta: true,
            rows: vec![RawRow {
                rowid: 0,
                cells: vec![Some(7i64.to_be_bytes().to_vec())],
            }],
        };
        let mut buf = ByteBuffer::new();
        reply.write(&mut buf, &cols).unwrap();
        let mut msg = FetchMessage::new(1, 10, 100, 4096, cols);
        assert_eq!(msg.decode(&FrameHeader::default(), &mut buf, &ctx).unwrap(), reply);
    }
}
