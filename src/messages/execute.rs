//! Execute family of messages
//!
//! `Execute` runs direct SQL text or a prepared statement with one row of
//! parameters, `Execute2` additionally carries the full parameter descriptor
//! block, and `BatchExecute` carries N rows at once. `PreExecute` and
//! `PutData` implement the off-row parameter channel.

use crate::buffer::ByteBuffer;
use crate::constants::{col_type, exec_type, limits, scale_mask, sql_type, IoType, MessageType};
use crate::encoding::Encoding;
use crate::error::{Error, Result, RowError, EC_BP_WITH_ERROR};
use crate::packet::FrameHeader;

use super::rowset::{read_bdta, read_row_wise, write_bdta, write_row_wise, RawRow};
use super::txn::TableTimestamp;
use super::{ColumnInfo, ExecInfo, Message, ParamInfo, WireContext};

/// One row of bound parameter cells
pub type ParamRow = Vec<Option<Vec<u8>>>;

/// Per-execute request options
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Commit after the statement
    pub autocommit: bool,
    /// Server-enforced timeout in seconds (0 = none)
    pub query_timeout: i32,
    /// Row cap for result sets (0 = unlimited)
    pub max_rows: i64,
    /// Keep executing batch rows after a failure
    pub continue_batch_on_error: bool,
    /// Accept BDTA row sets
    pub bdta: bool,
    /// Statement flag bits
    pub stmt_flags: u8,
    /// Rows in the first window
    pub fetch_size: i32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            autocommit: true,
            query_timeout: 0,
            max_rows: 0,
            continue_batch_on_error: false,
            bdta: false,
            stmt_flags: 0,
            fetch_size: limits::DEFAULT_FETCH_SIZE,
        }
    }
}

/// Parameter count as carried in the 16-bit request field
fn param_count_field(count: usize) -> Result<u16> {
    u16::try_from(count).map_err(|_| Error::ParamCountLimit {
        count,
        limit: limits::PARAM_COUNT_LIMIT,
    })
}

impl ExecuteOptions {
    fn write(&self, buf: &mut ByteBuffer, param_count: usize, row_count: usize, mode: ExecuteMode) -> Result<()> {
        let count = param_count_field(param_count)?;
        buf.write_u8(self.autocommit as u8);
        buf.write_u16(count);
        buf.write_i32(row_count as i32);
        buf.write_i32(self.query_timeout);
        buf.write_i64(self.max_rows);
        buf.write_u8(self.continue_batch_on_error as u8);
        buf.write_u8(self.bdta as u8);
        buf.write_u8(self.stmt_flags);
        buf.write_u8(mode.code());
        buf.write_i32(self.fetch_size);
        Ok(())
    }
}

/// How the statement body is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteMode {
    /// SQL text without parameters
    #[default]
    Direct,
    /// Prepared statement with parameter rows
    Prepared,
    /// Prepared statement, result delivered page by page
    Paged,
}

impl ExecuteMode {
    fn code(self) -> u8 {
        match self {
            ExecuteMode::Direct => exec_type::NO_PARAMS,
            ExecuteMode::Prepared => exec_type::PREPARED,
            ExecuteMode::Paged => exec_type::PAGED,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            exec_type::NO_PARAMS => Ok(ExecuteMode::Direct),
            exec_type::PREPARED => Ok(ExecuteMode::Prepared),
            exec_type::PAGED => Ok(ExecuteMode::Paged),
            other => Err(Error::Protocol(format!("unknown execute type {other}"))),
        }
    }
}

/// Result set carried in execute, describe and prepare replies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSegment {
    /// Columns, when the server sent descriptors
    pub columns: Option<Vec<ColumnInfo>>,
    /// Rows were BDTA encoded
    pub bdta: bool,
    /// First window of rows
    pub rows: Vec<RawRow>,
}

impl ResultSegment {
    /// Decode a segment; `known` supplies the columns when the server omits them
    pub fn read(
        buf: &mut ByteBuffer,
        ctx: &WireContext,
        info: &ExecInfo,
        known: &[ColumnInfo],
        with_base_name: bool,
    ) -> Result<Self> {
        let columns = if buf.read_bool()? {
            let mut cols = Vec::with_capacity(info.col_count.max(0) as usize);
            for _ in 0..info.col_count {
                cols.push(ColumnInfo::read(buf, ctx, with_base_name)?);
            }
            Some(cols)
        } else {
            None
        };
        let effective = columns.as_deref().unwrap_or(known);
        let bdta = buf.read_bool()?;
        let rows = read_rows(buf, effective, bdta)?;
        Ok(Self { columns, bdta, rows })
    }

    /// Encode a segment (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext, known: &[ColumnInfo], with_base_name: bool) -> Result<()> {
        match &self.columns {
            Some(cols) => {
                buf.write_u8(1);
                for c in cols {
                    c.write(buf, ctx, with_base_name);
                }
            }
            None => buf.write_u8(0),
        }
        let effective = self.columns.as_deref().unwrap_or(known);
        buf.write_u8(self.bdta as u8);
        write_rows(buf, effective, &self.rows, self.bdta)
    }
}

pub(crate) fn read_rows(buf: &mut ByteBuffer, columns: &[ColumnInfo], bdta: bool) -> Result<Vec<RawRow>> {
    if bdta {
        read_bdta(buf, columns)
    } else {
        read_row_wise(buf, columns.len())
    }
}

pub(crate) fn write_rows(buf: &mut ByteBuffer, columns: &[ColumnInfo], rows: &[RawRow], bdta: bool) -> Result<()> {
    if bdta {
        write_bdta(buf, columns, rows)
    } else {
        write_row_wise(buf, rows);
        Ok(())
    }
}

/// Statement-type specific payload following the envelope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecPayload {
    /// Nothing extra
    #[default]
    None,
    /// New current schema
    Schema(String),
    /// New isolation code
    Isolation(i32),
    /// New read-only flag
    ReadOnly(bool),
    /// New date, time or timestamp format (by `sql_type`)
    Format(i16, String),
    /// Explain plan text
    Explain(String),
}

impl ExecPayload {
    fn read(buf: &mut ByteBuffer, ctx: &WireContext, ret_sql_type: i16) -> Result<Self> {
        Ok(match ret_sql_type {
            sql_type::SET_SCHEMA => ExecPayload::Schema(buf.read_string(ctx.encoding)?),
            sql_type::SET_ISOLATION => ExecPayload::Isolation(buf.read_i32()?),
            sql_type::SET_READONLY => ExecPayload::ReadOnly(buf.read_bool()?),
            t @ (sql_type::SET_DATE_FORMAT | sql_type::SET_TIME_FORMAT | sql_type::SET_TIMESTAMP_FORMAT) => {
                ExecPayload::Format(t, buf.read_string(ctx.encoding)?)
            }
            sql_type::EXPLAIN => ExecPayload::Explain(buf.read_string(ctx.encoding)?),
            _ => ExecPayload::None,
        })
    }

    fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext) {
        match self {
            ExecPayload::None => {}
            ExecPayload::Schema(s) | ExecPayload::Format(_, s) | ExecPayload::Explain(s) => {
                buf.write_string(s, ctx.encoding)
            }
            ExecPayload::Isolation(i) => buf.write_i32(*i),
            ExecPayload::ReadOnly(r) => buf.write_u8(*r as u8),
        }
    }
}

/// Decoded execute reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteReply {
    /// Envelope
    pub info: ExecInfo,
    /// Statement-type specific payload
    pub payload: ExecPayload,
    /// Output values by parameter position; `None` for input-only positions
    pub out_values: Vec<Option<Option<Vec<u8>>>>,
    /// Result set, if the statement produced one
    pub result: Option<ResultSegment>,
    /// Source table timestamps for result caching
    pub table_ts: Vec<TableTimestamp>,
}

impl ExecuteReply {
    /// Decode the reply
    pub fn read(
        buf: &mut ByteBuffer,
        ctx: &WireContext,
        params: &[ParamInfo],
        known: &[ColumnInfo],
        with_base_name: bool,
    ) -> Result<Self> {
        let info = ExecInfo::read(buf, ctx)?;
        let payload = ExecPayload::read(buf, ctx, info.ret_sql_type)?;
        let mut out_values = vec![None; params.len()];
        for (slot, p) in out_values.iter_mut().zip(params) {
            if p.io_type.has_output() {
                *slot = Some(buf.read_cell()?);
            }
        }
        let result = if info.has_result_set {
            Some(ResultSegment::read(buf, ctx, &info, known, with_base_name)?)
        } else {
            None
        };
        let table_ts = if info.rs_cache_offset != 0 {
            TableTimestamp::read_list(buf)?
        } else {
            Vec::new()
        };
        Ok(Self {
            info,
            payload,
            out_values,
            result,
            table_ts,
        })
    }

    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext, known: &[ColumnInfo]) -> Result<()> {
        self.info.write(buf, ctx);
        self.payload.write(buf, ctx);
        for value in self.out_values.iter().flatten() {
            buf.write_cell(value.as_deref());
        }
        if let Some(result) = &self.result {
            result.write(buf, ctx, known, false)?;
        }
        if self.info.rs_cache_offset != 0 {
            TableTimestamp::write_list(buf, &self.table_ts);
        }
        Ok(())
    }
}

/// Single-row execute (`Execute` or `Execute2`)
#[derive(Debug, Clone, Default)]
pub struct ExecuteMessage {
    /// Server statement id
    pub stmt_id: i32,
    /// Body form
    pub mode: ExecuteMode,
    /// SQL text for [`ExecuteMode::Direct`]
    pub sql: String,
    /// Parameter descriptors
    pub params: Vec<ParamInfo>,
    /// Bound cells, one per parameter
    pub row: ParamRow,
    /// Request options
    pub options: ExecuteOptions,
    /// Send the descriptor block (`Execute2`)
    pub with_descriptors: bool,
    /// Columns already known from prepare
    pub columns: Vec<ColumnInfo>,
    /// Base column names were requested at prepare
    pub read_base_col: bool,
}

impl ExecuteMessage {
    /// Direct execution of SQL text
    pub fn direct(stmt_id: i32, sql: impl Into<String>, options: ExecuteOptions) -> Self {
        Self {
            stmt_id,
            sql: sql.into(),
            options,
            ..Default::default()
        }
    }

    /// Prepared execution with one row
    pub fn prepared(stmt_id: i32, params: Vec<ParamInfo>, row: ParamRow, options: ExecuteOptions) -> Self {
        Self {
            stmt_id,
            mode: ExecuteMode::Prepared,
            params,
            row,
            options,
            ..Default::default()
        }
    }

    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext, with_descriptors: bool) -> Result<Self> {
        let (options, param_count, _rows, mode) = read_exec_header(buf)?;
        let mut msg = ExecuteMessage {
            mode,
            options,
            with_descriptors,
            ..Default::default()
        };
        if with_descriptors {
            for _ in 0..param_count {
                msg.params.push(ParamInfo::read(buf)?);
            }
        }
        if mode == ExecuteMode::Direct {
            msg.sql = buf.read_string(ctx.encoding)?;
        } else {
            for _ in 0..param_count {
                msg.row.push(buf.read_cell()?);
            }
        }
        Ok(msg)
    }
}

/// Apply subtype mask adjustments before a descriptor goes on the wire
pub fn wire_param(p: &ParamInfo) -> ParamInfo {
    let mut out = p.clone();
    if p.has_mask(scale_mask::LOCAL_DATETIME) && p.col_type == col_type::DATETIME_TZ {
        out.col_type = col_type::DATETIME;
    }
    if p.has_mask(scale_mask::ORACLE_DATE) && p.col_type == col_type::DATE {
        out.col_type = col_type::DATETIME;
    }
    if p.has_mask(scale_mask::ORACLE_FLOAT) && p.col_type == col_type::DECIMAL {
        out.col_type = col_type::DOUBLE;
    }
    out.scale = p.pure_scale();
    out
}

fn read_exec_header(buf: &mut ByteBuffer) -> Result<(ExecuteOptions, usize, usize, ExecuteMode)> {
    let autocommit = buf.read_bool()?;
    let param_count = buf.read_i16()? as u16 as usize;
    let row_count = buf.read_i32()?.max(0) as usize;
    let query_timeout = buf.read_i32()?;
    let max_rows = buf.read_i64()?;
    let continue_batch_on_error = buf.read_bool()?;
    let bdta = buf.read_bool()?;
    let stmt_flags = buf.read_u8()?;
    let mode = ExecuteMode::from_code(buf.read_u8()?)?;
    let fetch_size = buf.read_i32()?;
    Ok((
        ExecuteOptions {
            autocommit,
            query_timeout,
            max_rows,
            continue_batch_on_error,
            bdta,
            stmt_flags,
            fetch_size,
        },
        param_count,
        row_count,
        mode,
    ))
}

impl Message for ExecuteMessage {
    type Output = ExecuteReply;

    fn msg_type(&self) -> MessageType {
        if self.with_descriptors {
            MessageType::Execute2
        } else {
            MessageType::Execute
        }
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()> {
        let param_count = if self.mode == ExecuteMode::Direct { 0 } else { self.params.len() };
        if self.mode != ExecuteMode::Direct && self.row.len() != param_count {
            return Err(Error::UnboundedParameter(self.row.len().min(param_count) + 1));
        }
        self.options.write(buf, param_count, 1, self.mode)?;
        if self.with_descriptors {
            for p in &self.params {
                wire_param(p).write(buf);
            }
        }
        if self.mode == ExecuteMode::Direct {
            buf.write_string(&self.sql, ctx.encoding);
        } else {
            for (cell, p) in self.row.iter().zip(&self.params) {
                let value = if p.io_type == IoType::Out { None } else { cell.as_deref() };
                buf.write_cell(value);
            }
        }
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<ExecuteReply> {
        let reply = ExecuteReply::read(body, ctx, &self.params, &self.columns, self.read_base_col)?;
        tracing::trace!(
            stmt_id = self.stmt_id,
            sql_type = reply.info.ret_sql_type,
            row_count = reply.info.row_count,
            "execute reply"
        );
        Ok(reply)
    }
}

/// BatchExecute reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReply {
    /// Envelope
    pub info: ExecInfo,
    /// Per-row update counts, `-3` at failed rows
    pub update_counts: Vec<i64>,
    /// Per-row failures (only when the server reported partial failure)
    pub errors: Vec<RowError>,
}

impl BatchReply {
    /// Total affected rows, ignoring failed rows
    pub fn rows_affected(&self) -> i64 {
        self.update_counts.iter().filter(|c| **c > 0).sum()
    }

    /// Encode the reply (used by test servers)
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext) {
        self.info.write(buf, ctx);
        buf.write_i32(self.update_counts.len() as i32);
        for c in &self.update_counts {
            buf.write_i64(*c);
        }
        if !self.errors.is_empty() {
            buf.write_i32(self.errors.len() as i32);
            for e in &self.errors {
                buf.write_i32(e.row as i32);
                buf.write_i32(e.code);
                buf.write_string(&e.message, ctx.encoding);
            }
        }
    }
}

/// N-row execute of a prepared statement
#[derive(Debug, Clone, Default)]
pub struct BatchExecuteMessage {
    /// Server statement id
    pub stmt_id: i32,
    /// Parameter descriptors
    pub params: Vec<ParamInfo>,
    /// Send `params` ahead of the rows
    pub with_descriptors: bool,
    /// Parameter rows
    pub rows: Vec<ParamRow>,
    /// Request options
    pub options: ExecuteOptions,
}

impl BatchExecuteMessage {
    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let (options, param_count, row_count, _mode) = read_exec_header(buf)?;
        let with_descriptors = buf.read_bool()?;
        let mut params = Vec::new();
        if with_descriptors {
            for _ in 0..param_count {
                params.push(ParamInfo::read(buf)?);
            }
        }
        let mut rows = Vec::with_capacity(row_count.min(4096));
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                row.push(buf.read_cell()?);
            }
            rows.push(row);
        }
        Ok(Self {
            params,
            with_descriptors,
            options,
            rows,
            ..Default::default()
        })
    }
}

impl Message for BatchExecuteMessage {
    type Output = BatchReply;

    fn msg_type(&self) -> MessageType {
        MessageType::BatchExecute
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        self.options
            .write(buf, self.params.len(), self.rows.len(), ExecuteMode::Prepared)?;
        buf.write_u8(self.with_descriptors as u8);
        if self.with_descriptors {
            for p in &self.params {
                wire_param(p).write(buf);
            }
        }
        for (r, row) in self.rows.iter().enumerate() {
            if row.len() != self.params.len() {
                return Err(Error::BatchError {
                    row: r,
                    source: Box::new(Error::UnboundedParameter(row.len().min(self.params.len()) + 1)),
                });
            }
            for cell in row {
                buf.write_cell(cell.as_deref());
            }
        }
        Ok(())
    }

    fn decode(&mut self, header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<BatchReply> {
        let info = ExecInfo::read(body, ctx)?;
        let count = body.read_i32()?.max(0) as usize;
        let mut update_counts = Vec::with_capacity(count);
        for _ in 0..count {
            update_counts.push(body.read_i64()?);
        }
        let mut errors = Vec::new();
        if header.error_code() == EC_BP_WITH_ERROR {
            let n = body.read_i32()?.max(0) as usize;
            for _ in 0..n {
                let row = body.read_i32()?.max(0) as usize;
                let code = body.read_i32()?;
                let message = body.read_string(Encoding::for_error_text(ctx.locale, ctx.encoding))?;
                if let Some(c) = update_counts.get_mut(row) {
                    *c = -3;
                }
                errors.push(RowError { row, code, message });
            }
        }
        Ok(BatchReply {
            info,
            update_counts,
            errors,
        })
    }
}

/// Open off-row parameter handles before streaming their data
#[derive(Debug, Clone, Default)]
pub struct PreExecuteMessage {
    /// Server statement id
    pub stmt_id: i32,
    /// Parameter descriptors
    pub params: Vec<ParamInfo>,
}

impl Message for PreExecuteMessage {
    type Output = ExecInfo;

    fn msg_type(&self) -> MessageType {
        MessageType::PreExecute
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        buf.write_u16(param_count_field(self.params.len())?);
        for p in &self.params {
            wire_param(p).write(buf);
        }
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, body: &mut ByteBuffer, ctx: &WireContext) -> Result<ExecInfo> {
        ExecInfo::read(body, ctx)
    }
}

/// One chunk of an off-row parameter value
#[derive(Debug, Clone, Default)]
pub struct PutDataMessage {
    /// Server statement id
    pub stmt_id: i32,
    /// Zero-based parameter position
    pub param_index: i16,
    /// Chunk bytes (at most [`limits::PUT_DATA_CHUNK`])
    pub chunk: Vec<u8>,
}

impl PutDataMessage {
    /// Decode a request body (used by test servers)
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext) -> Result<Self> {
        let param_index = buf.read_i16()?;
        let len = buf.read_i32()?.max(0) as usize;
        let chunk = buf.read_bytes(len)?;
        if ctx.new_lob {
            buf.read_i32()?;
        }
        Ok(Self {
            stmt_id: 0,
            param_index,
            chunk,
        })
    }
}

impl Message for PutDataMessage {
    type Output = ();

    fn msg_type(&self) -> MessageType {
        MessageType::PutData
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn encode(&self, buf: &mut ByteBuffer, ctx: &WireContext) -> Result<()> {
        if self.chunk.len() > limits::PUT_DATA_CHUNK {
            return Err(Error::DataTooLong(self.chunk.len()));
        }
        buf.write_i16(self.param_index);
        buf.write_i32(self.chunk.len() as i32);
        buf.write_bytes(&self.chunk);
        if ctx.new_lob {
            buf.write_i32(-1);
        }
        Ok(())
    }

    fn decode(&mut self, _header: &FrameHeader, _body: &mut ByteBuffer, _ctx: &WireContext) -> Result<()> {
        Ok(())
    }
}
