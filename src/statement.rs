//! Prepared statements and parameter binding
//!
//! A [`Statement`] is a handle to a server-side prepared statement owned by a
//! [`Connection`](crate::Connection). Each execution binds host [`Value`]s
//! against the parameter descriptors the server returned at prepare time:
//!
//! - strings and byte strings of [`limits::VARCHAR_PREC`] bytes or more are
//!   promoted to CLOB/BLOB and shipped off-row before the execute
//! - shorter ones keep an inline VARCHAR/VARBINARY slot whose precision is
//!   widened to the next quarter of the maximum
//! - an empty string binds as NULL for numeric and datetime parameters
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(conn: &dm_rs::Connection) -> dm_rs::Result<()> {
//! use dm_rs::Value;
//!
//! let stmt = conn.prepare("INSERT INTO t (id, name) VALUES (?, ?)").await?;
//! stmt.execute(&[Value::Integer(1), Value::from("one")]).await?;
//! stmt.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use crate::batch::BatchResult;
use crate::connection::{ConnCore, ExecResult};
use crate::constants::{col_type, limits, IoType};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::messages::{ColumnInfo, ParamInfo, ParamRow};
use crate::row::{CursorRef, Value};
use crate::rows::Rows;
use crate::types::Decimal;

/// Statement type determined from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// Unknown or unparsed statement
    #[default]
    Unknown,
    /// SELECT query
    Query,
    /// DML: INSERT, UPDATE, DELETE, MERGE
    Dml,
    /// DDL: CREATE, ALTER, DROP, etc.
    Ddl,
    /// Procedure call or anonymous block
    Call,
    /// SET and other session statements
    Set,
}

impl StatementType {
    /// Classify a SQL text by its first keyword
    pub fn from_sql(sql: &str) -> Self {
        match sql_head(sql).as_str() {
            "SELECT" | "WITH" => StatementType::Query,
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementType::Dml,
            "CREATE" | "ALTER" | "DROP" | "GRANT" | "REVOKE" | "COMMENT" | "TRUNCATE" => {
                StatementType::Ddl
            }
            "DECLARE" | "BEGIN" | "CALL" | "EXEC" | "EXECUTE" => StatementType::Call,
            "SET" => StatementType::Set,
            _ => StatementType::Unknown,
        }
    }

    /// Check if the statement may return rows
    pub fn may_return_rows(&self) -> bool {
        matches!(self, StatementType::Query | StatementType::Call | StatementType::Unknown)
    }
}

/// First keyword of `sql`, uppercased, skipping whitespace, comments and
/// opening parentheses
pub fn sql_head(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(r) = rest.strip_prefix("--") {
            rest = r.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(r) = rest.strip_prefix("/*") {
            rest = r.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_uppercase()
}

/// Check if a statement writes and therefore must run on the primary
pub(crate) fn is_write_sql(sql: &str) -> bool {
    matches!(
        sql_head(sql).as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "CREATE" | "TRUNCATE" | "DROP" | "ALTER"
    )
}

/// A bind parameter with direction support
///
/// # Examples
///
/// ```ignore
/// use dm_rs::constants::col_type;
/// use dm_rs::{BindParam, Value};
///
/// let result = stmt.call(&[
///     BindParam::input(Value::Integer(21)),
///     BindParam::output(col_type::INT, 4),
///     BindParam::output_cursor(),
/// ]).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BindParam {
    /// The value (None for pure OUT parameters)
    pub value: Option<Value>,
    /// Parameter direction
    pub io_type: IoType,
    /// Declared column type for OUT parameters
    pub col_type: Option<i32>,
    /// Buffer precision for OUT parameters
    pub prec: i32,
}

impl BindParam {
    /// Create an IN parameter from a value
    pub fn input(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            io_type: IoType::In,
            col_type: None,
            prec: 0,
        }
    }

    /// Create an OUT parameter with the expected type and precision
    pub fn output(col_type: i32, prec: i32) -> Self {
        Self {
            value: None,
            io_type: IoType::Out,
            col_type: Some(col_type),
            prec,
        }
    }

    /// Create an IN OUT parameter
    pub fn input_output(value: impl Into<Value>, prec: i32) -> Self {
        Self {
            value: Some(value.into()),
            io_type: IoType::InOut,
            col_type: None,
            prec,
        }
    }

    /// Create an OUT parameter for a cursor
    pub fn output_cursor() -> Self {
        Self::output(col_type::CURSOR, 4)
    }
}

impl From<Value> for BindParam {
    fn from(value: Value) -> Self {
        Self::input(value)
    }
}

impl From<&Value> for BindParam {
    fn from(value: &Value) -> Self {
        Self::input(value.clone())
    }
}

/// Placeholder a LOB slot carries when its data went off-row
pub(crate) const OFF_ROW_MARKER: [u8; 4] = [0, 0, 0, 0];

/// One bound parameter ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundParam {
    pub info: ParamInfo,
    pub cell: Option<Vec<u8>>,
    pub off_row: Option<Vec<u8>>,
    pub cursor: bool,
}

/// A full parameter row
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BoundRow {
    pub params: Vec<ParamInfo>,
    pub cells: ParamRow,
    /// Parameter index and data for the off-row path
    pub off_row: Vec<(usize, Vec<u8>)>,
    /// Positions that need a child statement for a cursor
    pub cursors: Vec<usize>,
}

impl BoundRow {
    /// Check if any value travels outside the execute body
    pub fn needs_off_row(&self) -> bool {
        !self.off_row.is_empty()
    }

    /// Check if any position returns a value
    pub fn has_output(&self) -> bool {
        self.params.iter().any(|p| p.io_type.has_output())
    }
}

/// Check if an empty string binds as NULL for a parameter of type `code`
pub(crate) fn empty_string_is_null(code: i32) -> bool {
    !(col_type::is_character(code)
        || col_type::is_lob(code)
        || matches!(code, col_type::BINARY | col_type::VARBINARY))
}

/// Widen `declared` so that `len` bytes fit, in quarters of the maximum
pub(crate) fn widen_prec(declared: i32, len: usize) -> i32 {
    let n = limits::VARCHAR_PREC;
    if len <= declared.max(0) as usize {
        return declared;
    }
    let bucket = [n / 4, n / 2, 3 * n / 4, n]
        .into_iter()
        .find(|b| len <= *b)
        .unwrap_or(n);
    bucket as i32
}

fn set_type(info: &mut ParamInfo, code: i32, prec: i32) {
    if info.col_type != code {
        info.col_type = code;
        info.scale = 0;
        info.type_desc = None;
    }
    info.prec = prec;
}

fn bind_bytes(info: &mut ParamInfo, data: Vec<u8>, lob: i32, inline: i32) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    if data.len() >= limits::VARCHAR_PREC {
        if info.io_type.has_output() {
            return Err(Error::StringCut {
                length: data.len(),
                precision: limits::VARCHAR_PREC as i32,
            });
        }
        set_type(info, lob, 0);
        return Ok((Some(OFF_ROW_MARKER.to_vec()), Some(data)));
    }
    let keep = if inline == col_type::VARCHAR {
        col_type::is_character(info.col_type) && !col_type::is_lob(info.col_type)
    } else {
        matches!(info.col_type, col_type::BINARY | col_type::VARBINARY)
    };
    let code = if keep { info.col_type } else { inline };
    let declared = if keep { info.prec } else { 0 };
    set_type(info, code, widen_prec(declared, data.len()));
    Ok((Some(data), None))
}

/// Bind one value against the server descriptor
pub(crate) fn bind_param(server: &ParamInfo, bind: &BindParam, encoding: Encoding) -> Result<BoundParam> {
    let io_type = if server.io_type.has_output() {
        server.io_type
    } else if bind.io_type.has_output() {
        bind.io_type
    } else {
        IoType::In
    };
    let mut info = ParamInfo {
        io_type,
        ..server.clone()
    };
    if let Some(code) = bind.col_type {
        if bind.value.is_none() && !server.io_type.has_output() {
            set_type(&mut info, code, bind.prec);
        }
    }
    if bind.prec > info.prec {
        info.prec = bind.prec;
    }

    if info.col_type == col_type::CURSOR && io_type.has_output() {
        info.io_type = IoType::InOut;
        return Ok(BoundParam {
            info,
            cell: None,
            off_row: None,
            cursor: true,
        });
    }
    if io_type == IoType::Out {
        return Ok(BoundParam {
            info,
            cell: None,
            off_row: None,
            cursor: false,
        });
    }

    let value = bind.value.as_ref().unwrap_or(&Value::Null);
    let (cell, off_row) = match value {
        Value::Null => (None, None),
        Value::String(s) if s.is_empty() && empty_string_is_null(info.col_type) => (None, None),
        Value::String(s) => {
            let data = encoding.encode(s).into_owned();
            bind_bytes(&mut info, data, col_type::CLOB, col_type::VARCHAR)?
        }
        Value::Bytes(b) => bind_bytes(&mut info, b.clone(), col_type::BLOB, col_type::VARBINARY)?,
        Value::Integer(i) => (Some(bind_integer(&mut info, *i)?), None),
        Value::Boolean(b) => {
            let code = if info.col_type == col_type::BOOLEAN { col_type::BOOLEAN } else { col_type::BIT };
            set_type(&mut info, code, 1);
            (Some(vec![*b as u8]), None)
        }
        Value::Float(f) => match info.col_type {
            col_type::REAL => {
                set_type(&mut info, col_type::REAL, 4);
                (Some((*f as f32).to_be_bytes().to_vec()), None)
            }
            col_type::DECIMAL => (Some(Decimal::try_from(*f)?.to_wire()?), None),
            _ => {
                set_type(&mut info, col_type::DOUBLE, 8);
                (Some(f.to_be_bytes().to_vec()), None)
            }
        },
        Value::Decimal(d) => {
            if info.col_type != col_type::DECIMAL {
                set_type(&mut info, col_type::DECIMAL, 0);
            }
            (Some(d.to_wire()?), None)
        }
        Value::DateTime(dt) => {
            let code = if col_type::is_datetime(info.col_type) {
                info.col_type
            } else if dt.tz_minutes.is_some() {
                col_type::DATETIME_TZ
            } else {
                col_type::DATETIME
            };
            let prec = if code == info.col_type { info.prec } else { 0 };
            set_type(&mut info, code, prec);
            (Some(dt.to_wire(code)?), None)
        }
        Value::IntervalYM(v) => {
            let prec = info.prec;
            set_type(&mut info, col_type::INTERVAL_YM, prec);
            (Some(v.to_wire()), None)
        }
        Value::IntervalDT(v) => {
            let prec = info.prec;
            set_type(&mut info, col_type::INTERVAL_DT, prec);
            (Some(v.to_wire()), None)
        }
        Value::Lob(lob) => {
            lob.check_live()?;
            let code = if lob.is_clob { col_type::CLOB } else { col_type::BLOB };
            set_type(&mut info, code, 0);
            (Some(lob.to_cell()), None)
        }
        Value::Cursor(_) => return Err(Error::UnsupportedInParamType("CURSOR".to_string())),
    };
    Ok(BoundParam {
        info,
        cell,
        off_row,
        cursor: false,
    })
}

fn bind_integer(info: &mut ParamInfo, v: i64) -> Result<Vec<u8>> {
    Ok(match info.col_type {
        col_type::TINYINT | col_type::SMALLINT | col_type::INT if i32::try_from(v).is_ok() => {
            set_type(info, col_type::INT, 4);
            (v as i32).to_be_bytes().to_vec()
        }
        col_type::BIT | col_type::BOOLEAN => vec![(v != 0) as u8],
        col_type::DECIMAL => Decimal::from(v).to_wire()?,
        col_type::REAL | col_type::DOUBLE => {
            set_type(info, col_type::DOUBLE, 8);
            (v as f64).to_be_bytes().to_vec()
        }
        _ => {
            set_type(info, col_type::BIGINT, 8);
            v.to_be_bytes().to_vec()
        }
    })
}

/// Bind a full row; `binds` must match the server's parameter count
pub(crate) fn bind_row(server: &[ParamInfo], binds: &[BindParam], encoding: Encoding) -> Result<BoundRow> {
    if binds.len() < server.len() {
        return Err(Error::UnboundedParameter(binds.len() + 1));
    }
    if binds.len() > server.len() {
        return Err(Error::DataConversion(format!(
            "{} values bound to {} parameters",
            binds.len(),
            server.len()
        )));
    }
    let mut row = BoundRow::default();
    for (i, (param, bind)) in server.iter().zip(binds).enumerate() {
        let bound = bind_param(param, bind, encoding)?;
        if bound.cursor {
            row.cursors.push(i);
        }
        if let Some(data) = bound.off_row {
            row.off_row.push((i, data));
        }
        row.params.push(bound.info);
        row.cells.push(bound.cell);
    }
    Ok(row)
}

/// Client-side knobs passed with each execution
#[derive(Debug, Clone, Copy)]
pub(crate) struct StmtOptions {
    pub query_timeout: i32,
    pub fetch_size: i32,
    pub max_rows: i64,
}

/// Values returned by a procedure call
#[derive(Debug, Clone, Default)]
pub struct CallResult {
    /// Returned value per parameter position (None for IN positions)
    pub out_values: Vec<Option<Value>>,
    /// Rows affected by the call
    pub rows_affected: u64,
}

impl CallResult {
    /// Get the returned value at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.out_values.get(index).and_then(Option::as_ref)
    }

    /// Get a returned string
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Get a returned integer
    pub fn get_integer(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    /// Get a returned cursor
    pub fn get_cursor(&self, index: usize) -> Option<CursorRef> {
        self.get(index).and_then(Value::as_cursor)
    }
}

/// A prepared statement
///
/// Dropping a statement without [`close`](Statement::close) queues its server
/// handle for release before the connection's next request.
#[derive(Debug)]
pub struct Statement {
    core: Weak<ConnCore>,
    key: u64,
    sql: String,
    statement_type: StatementType,
    params: Vec<ParamInfo>,
    columns: Vec<ColumnInfo>,
    query_timeout: Option<Duration>,
    fetch_size: i32,
    max_rows: i64,
    closed: AtomicBool,
}

impl Statement {
    pub(crate) fn new(
        core: Weak<ConnCore>,
        key: u64,
        sql: &str,
        params: Vec<ParamInfo>,
        columns: Vec<ColumnInfo>,
        fetch_size: i32,
        max_rows: i64,
    ) -> Self {
        Self {
            core,
            key,
            sql: sql.to_string(),
            statement_type: StatementType::from_sql(sql),
            params,
            columns,
            query_timeout: None,
            fetch_size,
            max_rows,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    /// SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Statement type
    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// Parameter descriptors from prepare
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Number of parameters
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Result columns from prepare (empty for non-queries)
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Set a server-enforced timeout for each execution
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    /// Rows per fetch window
    pub fn set_fetch_size(&mut self, rows: i32) {
        self.fetch_size = rows.max(1);
    }

    /// Cap on rows returned (0 means unlimited)
    pub fn set_max_rows(&mut self, rows: i64) {
        self.max_rows = rows.max(0);
    }

    /// Check if the statement is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn options(&self) -> StmtOptions {
        StmtOptions {
            query_timeout: self
                .query_timeout
                .map_or(0, |t| i32::try_from(t.as_secs()).unwrap_or(i32::MAX)),
            fetch_size: self.fetch_size,
            max_rows: self.max_rows,
        }
    }

    fn core(&self) -> Result<std::sync::Arc<ConnCore>> {
        if self.is_closed() {
            return Err(Error::StatementHandleClosed);
        }
        self.core.upgrade().ok_or(Error::StatementHandleClosed)
    }

    /// Execute with IN values and return the update count
    pub async fn execute(&self, params: &[Value]) -> Result<ExecResult> {
        if self.statement_type == StatementType::Query {
            return Err(Error::NotExecSql);
        }
        let binds = params.iter().map(BindParam::from).collect();
        self.core()?.stmt_execute(self.key, binds, self.options()).await
    }

    /// Execute a query and stream its rows
    pub async fn query(&self, params: &[Value]) -> Result<Rows> {
        if !self.statement_type.may_return_rows() {
            return Err(Error::NotQuerySql);
        }
        let binds = params.iter().map(BindParam::from).collect();
        self.core()?.stmt_query(self.key, binds, self.options()).await
    }

    /// Call with IN, OUT and IN OUT parameters
    pub async fn call(&self, params: &[BindParam]) -> Result<CallResult> {
        self.core()?.stmt_call(self.key, params.to_vec(), self.options()).await
    }

    /// Execute once per row of values
    pub async fn execute_batch(&self, rows: &[Vec<Value>]) -> Result<BatchResult> {
        if self.statement_type == StatementType::Query {
            return Err(Error::NotExecSql);
        }
        self.core()?.stmt_batch(self.key, rows, self.options()).await
    }

    /// Release the server handle; a second call is a no-op
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.core.upgrade() {
            Some(core) => core.stmt_close(self.key).await,
            None => Ok(()),
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(core) = self.core.upgrade() {
                core.queue_statement_free(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DmDateTime;

    fn varchar(prec: i32) -> ParamInfo {
        ParamInfo::input(col_type::VARCHAR, prec, 0)
    }

    #[test]
    fn test_statement_type_detection() {
        assert_eq!(StatementType::from_sql("SELECT 1"), StatementType::Query);
        assert_eq!(StatementType::from_sql("  (select 1)"), StatementType::Query);
        assert_eq!(StatementType::from_sql("with x as (select 1) select * from x"), StatementType::Query);
        assert_eq!(StatementType::from_sql("insert into t values (1)"), StatementType::Dml);
        assert_eq!(StatementType::from_sql("MERGE INTO t"), StatementType::Dml);
        assert_eq!(StatementType::from_sql("create table t (x int)"), StatementType::Ddl);
        assert_eq!(StatementType::from_sql("BEGIN NULL; END;"), StatementType::Call);
        assert_eq!(StatementType::from_sql("set schema s"), StatementType::Set);
        assert_eq!(StatementType::from_sql("-- note\nDELETE FROM t"), StatementType::Dml);
        assert_eq!(StatementType::from_sql("/* hint */ update t set x = 1"), StatementType::Dml);
        assert_eq!(StatementType::from_sql(""), StatementType::Unknown);
    }

    #[test]
    fn test_write_classification() {
        assert!(is_write_sql("insert into t values (1)"));
        assert!(is_write_sql("TRUNCATE TABLE t"));
        assert!(!is_write_sql("SELECT * FROM t"));
        assert!(!is_write_sql("SET SCHEMA s"));
    }

    #[test]
    fn test_widen_prec_buckets() {
        assert_eq!(widen_prec(50, 10), 50);
        assert_eq!(widen_prec(10, 11), 2047);
        assert_eq!(widen_prec(0, 2048), 4094);
        assert_eq!(widen_prec(0, 6000), 6141);
        assert_eq!(widen_prec(0, 8187), 8188);
    }

    #[test]
    fn test_varchar_promotion_threshold() {
        let below = "a".repeat(limits::VARCHAR_PREC - 1);
        let b = bind_param(&varchar(10), &BindParam::input(below.as_str()), Encoding::Utf8).unwrap();
        assert_eq!(b.info.col_type, col_type::VARCHAR);
        assert_eq!(b.info.prec, limits::VARCHAR_PREC as i32);
        assert!(b.off_row.is_none());

        let at = "a".repeat(limits::VARCHAR_PREC);
        let b = bind_param(&varchar(10), &BindParam::input(at.as_str()), Encoding::Utf8).unwrap();
        assert_eq!(b.info.col_type, col_type::CLOB);
        assert_eq!(b.cell.as_deref(), Some(&OFF_ROW_MARKER[..]));
        assert_eq!(b.off_row.map(|d| d.len()), Some(limits::VARCHAR_PREC));
    }

    #[test]
    fn test_inout_too_long_is_cut() {
        let long = "x".repeat(limits::VARCHAR_PREC);
        let err = bind_param(&varchar(10), &BindParam::input_output(long.as_str(), 10), Encoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::StringCut { .. }));
    }

    #[test]
    fn test_empty_string_nulls() {
        let int = ParamInfo::input(col_type::INT, 4, 0);
        let b = bind_param(&int, &BindParam::input(""), Encoding::Utf8).unwrap();
        assert!(b.cell.is_none());
        assert_eq!(b.info.col_type, col_type::INT);

        let date = ParamInfo::input(col_type::DATE, 0, 0);
        assert!(bind_param(&date, &BindParam::input(""), Encoding::Utf8).unwrap().cell.is_none());

        let b = bind_param(&varchar(10), &BindParam::input(""), Encoding::Utf8).unwrap();
        assert_eq!(b.cell, Some(vec![]));
    }

    #[test]
    fn test_bind_scalars() {
        let int = ParamInfo::input(col_type::INT, 4, 0);
        let b = bind_param(&int, &BindParam::input(7i64), Encoding::Utf8).unwrap();
        assert_eq!(b.cell, Some(7i32.to_be_bytes().to_vec()));

        let big = bind_param(&int, &BindParam::input(i64::MAX), Encoding::Utf8).unwrap();
        assert_eq!(big.info.col_type, col_type::BIGINT);
        assert_eq!(big.cell.map(|c| c.len()), Some(8));

        let d = bind_param(&varchar(0), &BindParam::input(Value::Float(1.5)), Encoding::Utf8).unwrap();
        assert_eq!(d.info.col_type, col_type::DOUBLE);

        let dt = DmDateTime::default();
        let b = bind_param(&varchar(0), &BindParam::input(Value::DateTime(dt)), Encoding::Utf8).unwrap();
        assert_eq!(b.info.col_type, col_type::DATETIME);

        let err = bind_param(&varchar(0), &BindParam::input(Value::Cursor(CursorRef { stmt_id: 1 })), Encoding::Utf8);
        assert!(matches!(err, Err(Error::UnsupportedInParamType(_))));
    }

    #[test]
    fn test_output_positions() {
        let mut server = ParamInfo::input(col_type::INT, 4, 0);
        server.io_type = IoType::Out;
        let b = bind_param(&server, &BindParam::input(Value::Null), Encoding::Utf8).unwrap();
        assert_eq!(b.info.col_type, col_type::INT);
        assert!(b.cell.is_none());

        let b = bind_param(&varchar(0), &BindParam::output_cursor(), Encoding::Utf8).unwrap();
        assert!(b.cursor);
        assert_eq!(b.info.io_type, IoType::InOut);
    }

    #[test]
    fn test_bind_row_counts() {
        let server = vec![varchar(10), varchar(10)];
        let err = bind_row(&server, &[BindParam::input("a")], Encoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::UnboundedParameter(2)));

        let blob = vec![0u8; 20_000];
        let row = bind_row(&server, &[BindParam::input("a"), BindParam::input(blob)], Encoding::Utf8).unwrap();
        assert!(row.needs_off_row());
        assert_eq!(row.off_row[0].0, 1);
        assert_eq!(row.params[1].col_type, col_type::BLOB);
    }
}
