//! DM protocol messages
//!
//! One type per request. Each message writes its request body into the
//! session buffer and decodes the matching response body; the session takes
//! care of framing, checksums and transport.

mod describe;
mod execute;
mod fetch;
mod lob_op;
mod login;
mod rowset;
mod startup;
mod statement;
mod txn;

pub use describe::{ColumnInfo, ParamInfo};
pub use execute::{
    wire_param, BatchExecuteMessage, BatchReply, ExecPayload, ExecuteMessage, ExecuteMode,
    ExecuteOptions, ExecuteReply, ParamRow, PreExecuteMessage, PutDataMessage, ResultSegment,
};
pub use fetch::{FetchMessage, FetchReply};
pub use lob_op::{LobOp, LobOpMessage, LobReply};
pub use login::{
    Credential, LoginMessage, LoginReply, StandbyInfo, CAP_EXECUTE2, CAP_LOB_EMPTY_COMP_ORCL,
    CAP_MALINI2,
};
pub use rowset::{bdta_fixed_len, RawRow};
pub use startup::{version_at_least, StartupMessage, StartupReply};
pub use statement::{
    DescribeMessage, ParamDescribeMessage, PrepareMessage, PrepareReply,
    StmtAllocateMessage, StmtFreeMessage,
};
pub use txn::{
    CommitMessage, LogoutMessage, PingMessage, RollbackMessage, SetIsolationMessage,
    SetReadOnlyMessage, TableTimestamp, TableTsMessage,
};

use crate::buffer::ByteBuffer;
use crate::compress::CompressMode;
use crate::constants::{limits, sql_type, Locale, MessageType};
use crate::encoding::Encoding;
use crate::error::Result;
use crate::packet::FrameHeader;

/// Negotiated session properties the codecs depend on
#[derive(Debug, Clone)]
pub struct WireContext {
    /// Server character set
    pub encoding: Encoding,
    /// Client locale
    pub locale: Locale,
    /// Message protocol version agreed at startup
    pub msg_version: i32,
    /// LOB handles carry the extended locator fields
    pub new_lob: bool,
    /// Server accepted the new-client login format
    pub new_client: bool,
    /// Server may answer with columnar (BDTA) row sets
    pub bdta: bool,
    /// Outbound compression policy
    pub compress_mode: CompressMode,
    /// Minimum body size for `auto` compression
    pub compress_threshold: usize,
    /// Server runs on this host
    pub server_is_local: bool,
}

impl Default for WireContext {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            locale: Locale::default(),
            msg_version: crate::constants::MSG_VERSION,
            new_lob: false,
            new_client: false,
            bdta: false,
            compress_mode: CompressMode::Off,
            compress_threshold: limits::COMPRESS_THRESHOLD,
            server_is_local: false,
        }
    }
}

/// A request/response exchange
pub trait Message: Send {
    /// Decoded response
    type Output: Send;

    /// Logical message type stamped in the header
    fn msg_type(&self) -> MessageType;

    /// Statement id stamped in the header
    fn stmt_id(&self) -> i32 {
        0
    }

    /// Whether the body may be compressed on send
    fn compressible(&self) -> bool {
        !self.msg_type().is_handshake()
    }

    /// Write the request body
    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()>;

    /// Decode the response body
    fn decode(&mut self, header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<Self::Output>;
}

/// Execute-result envelope common to prepare, execute and describe replies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecInfo {
    /// `sql_type` code of the executed statement
    pub ret_sql_type: i16,
    /// Affected rows, or total rows of a result set (-1 when unknown)
    pub row_count: i64,
    /// Result-set column count
    pub col_count: i16,
    /// Parameter count
    pub param_count: i16,
    /// A result set follows
    pub has_result_set: bool,
    /// Row id of the last inserted row
    pub rowid: i64,
    /// Transaction status bits
    pub trx_status: i32,
    /// Non-zero when the result set is fully buffered and cacheable
    pub rs_cache_offset: i32,
    /// Explain or print output
    pub print_msg: Option<String>,
}

impl ExecInfo {
    /// Decode the envelope
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        let ret_sql_type = buf.read_i16()?;
        let row_count = buf.read_i64()?;
        let col_count = buf.read_i16()?;
        let param_count = buf.read_i16()?;
        let has_result_set = buf.read_bool()?;
        let rowid = buf.read_i64()?;
        let trx_status = buf.read_i32()?;
        let rs_cache_offset = buf.read_i32()?;
        let print_msg = buf.read_string(ctx.encoding)?;
        Ok(Self {
            ret_sql_type,
            row_count,
            col_count,
            param_count,
            has_result_set,
            rowid,
            trx_status,
            rs_cache_offset,
            print_msg: (!print_msg.is_empty()).then_some(print_msg),
        })
    }

    /// Encode the envelope
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext) {
        buf.write_i16(self.ret_sql_type);
        buf.write_i64(self.row_count);
        buf.write_i16(self.col_count);
        buf.write_i16(self.param_count);
        buf.write_u8(self.has_result_set as u8);
        buf.write_i64(self.rowid);
        buf.write_i32(self.trx_status);
        buf.write_i32(self.rs_cache_offset);
        buf.write_string(self.print_msg.as_deref().unwrap_or(""), ctx.encoding);
    }

    /// Check if the statement was a query
    pub fn is_select(&self) -> bool {
        self.ret_sql_type == sql_type::SELECT
    }
}
