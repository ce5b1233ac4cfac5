//! Statement handle messages: allocate, free, prepare, describe

use crate::buffer::ByteBuffer;
use crate::constants::MessageType;
use crate::error::Result;
use crate::packet::FrameHeader;

use super::execute::ResultSegment;
use super::{ColumnInfo, ExecInfo, Message, ParamInfo, WireContext};

/// Allocate a server statement handle
#[derive(Debug, Clone, Default)]
pub struct StmtAllocateMessage;

impl Message for StmtAllocateMessage {
    type Output = i32;

    fn msg_type(&self) -> MessageType {
        MessageType::StmtAllocate
    }

    fn encode(&self, _buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<i32> {
        body.read_i32()
    }
}

/// Free a server statement handle
#[derive(Debug, Clone, Default)]
pub struct StmtFreeMessage {
    /// Handle to release
    pub stmt_id: i32,
}

impl Message for StmtFreeMessage {
    type Output = ();

    fn msg_type(&self) -> MessageType {
        MessageType::StmtFree
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, _buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, _body: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        Ok(())
    }
}

/// Prepare SQL text on an allocated handle
#[derive(Debug, Clone, Default)]
pub struct PrepareMessage {
    /// Allocated handle
    pub stmt_id: i32,
    /// SQL text after rewriting
    pub sql: String,
    /// Ask the server for base column names
    pub read_base_col: bool,
}

/// Prepare reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareReply {
    /// Handle the statement lives on
    pub stmt_id: i32,
    /// Base column names are present in column descriptors
    pub read_base_col: bool,
    /// Envelope with parameter and column counts
    pub info: ExecInfo,
    /// Parameter descriptors
    pub params: Vec<ParamInfo>,
    /// Column descriptors
    pub columns: Vec<ColumnInfo>,
}

impl PrepareReply {
    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext) {
        buf.write_i32(self.stmt_id);
        buf.write_u8(self.read_base_col as u8);
        self.info.write(buf, ctx);
        for p in &self.params {
            p.write(buf);
        }
        for c in &self.columns {
            c.write(buf, ctx, self.read_base_col);
        }
    }
}

impl PrepareMessage {
    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        Ok(Self {
            stmt_id: 0,
            sql: buf.read_string(ctx.encoding)?,
            read_base_col: buf.read_bool()?,
        })
    }
}

impl Message for PrepareMessage {
    type Output = PrepareReply;

    fn msg_type(&self) -> MessageType {
        MessageType::Prepare
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()> {
        buf.write_string(&self.sql, ctx.encoding);
        buf.write_u8(self.read_base_col as u8);
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<PrepareReply> {
        let stmt_id = body.read_i32()?;
        let read_base_col = body.read_bool()?;
        let info = ExecInfo::read(body, ctx)?;
        let mut params = Vec::with_capacity(info.param_count.max(0) as usize);
        for _ in 0..info.param_count {
            params.push(ParamInfo::read(body)?);
        }
        let mut columns = Vec::with_capacity(info.col_count.max(0) as usize);
        for _ in 0..info.col_count {
            columns.push(ColumnInfo::read(body, ctx, read_base_col)?);
        }
        tracing::debug!(
            stmt_id,
            params = params.len(),
            columns = columns.len(),
            "statement prepared"
        );
        Ok(PrepareReply {
            stmt_id,
            read_base_col,
            info,
            params,
            columns,
        })
    }
}

/// Describe the next result set of a statement
#[derive(Debug, Clone, Default)]
pub struct DescribeMessage {
    /// Statement handle
    pub stmt_id: i32,
    /// Result set index (0 = next)
    pub next_index: i16,
    /// Base column names were requested at prepare
    pub read_base_col: bool,
}

impl Message for DescribeMessage {
    type Output = (ExecInfo, Option<ResultSegment>);

    fn msg_type(&self) -> MessageType {
        MessageType::Describe
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_i16(self.next_index);
        Ok(())
    }

    fn decode(
        &mut self,
        _header: &FrameHeader,
        body: &mut ByteBuffer,
        ctx: &WireContext,
    ) -> Result<(ExecInfo, Option<ResultSegment>)> {
        let info = ExecInfo::read(body, ctx)?;
        let segment = if info.has_result_set {
            Some(ResultSegment::read(body, ctx, &info, &[], self.read_base_col)?)
        } else {
            None
        };
        Ok((info, segment))
    }
}

/// Fetch parameter descriptors of a prepared statement
#[derive(Debug, Clone, Default)]
pub struct ParamDescribeMessage {
    /// Statement handle
    pub stmt_id: i32,
}

impl Message for ParamDescribeMessage {
    type Output = Vec<ParamInfo>;

    fn msg_type(&self) -> MessageType {
        MessageType::ParamDescribe
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, _buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, _ctx: &WireContext) -> Result<Vec<ParamInfo>> {
        let n = body.read_i16()?.max(0) as usize;
        (0..n).map(|_| ParamInfo::read(body)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::col_type;

    #[test]
    fn test_prepare_reply_decodes_descriptors() {
        let ctx = WireContext::default();
        let server = PrepareReply {
            stmt_id: 9,
            read_base_col: true,
            info: ExecInfo {
                ret_sql_type: crate::constants::sql_type::INSERT,
                param_count: 2,
                ..Default::default()
            },
            params: vec![
                ParamInfo::input(col_type::INT, 4, 0),
                ParamInfo::input(col_type::VARCHAR, 50, 0),
            ],
            columns: Vec::new(),
        };
        let mut body = ByteBuffer::new();
        server.write(&mut body, &ctx);
        let mut msg = PrepareMessage {
            stmt_id: 9,
            sql: "insert into t(a,b) values(?,?)".into(),
            read_base_col: true,
        };
        let reply = msg.decode(&FrameHeader::default(), &mut body, &ctx).unwrap();
        assert_eq!(reply, server);
    }

    #[test]
    fn test_describe_without_result() {
        let ctx = WireContext::default();
        let mut body = ByteBuffer::new();
        ExecInfo::default().write(&mut body, &ctx);
        let mut msg = DescribeMessage {
            stmt_id: 1,
            ..Default::default()
        };
        let (info, segment) = msg.decode(&FrameHeader::default(), &mut body, &ctx).unwrap();
        assert!(!info.has_result_set);
        assert!(segment.is_none());
    }
}
