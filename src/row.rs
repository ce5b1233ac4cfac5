//! Row data handling for DM query results
//!
//! This module provides:
//! - [`Value`], the decoded form of one cell
//! - [`Row`], one result row with typed accessors
//! - [`decode_cell`], the column-type driven cell decoder shared by result
//!   sets and output parameters

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::constants::col_type;
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::types::{DmDateTime, Decimal, IntervalDT, IntervalYM, LobLocator};

/// Server statement holding an opened cursor
///
/// Decoding a `CURSOR` column or output parameter yields only the handle; no
/// describe is sent. Pass it to [`Connection::open_cursor`] to fetch its
/// rows. The server statement stays allocated until those rows are closed
/// or the statement that returned it runs again.
///
/// [`Connection::open_cursor`]: crate::Connection::open_cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorRef {
    /// Server statement id the cursor lives on
    pub stmt_id: i32,
}

/// A value from a DM column or parameter.
///
/// Values can be read with the `as_*` accessors or converted with the
/// `TryFrom<&Value>` implementations.
///
/// # Example
///
/// ```rust
/// use dm_rs::Value;
///
/// let value = Value::from(42);
/// let n: i64 = (&value).try_into().unwrap();
/// assert_eq!(n, 42);
/// assert!(Value::from(None::<i32>).is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// BIT and BOOLEAN
    Boolean(bool),
    /// TINYINT, SMALLINT, INT and BIGINT
    Integer(i64),
    /// REAL and DOUBLE
    Float(f64),
    /// DECIMAL
    Decimal(Decimal),
    /// CHAR, VARCHAR and VARCHAR2
    String(String),
    /// BINARY, VARBINARY, and opaque composite types
    Bytes(Vec<u8>),
    /// Datetime family (DATE, TIME, DATETIME and the zoned variants)
    DateTime(DmDateTime),
    /// INTERVAL YEAR TO MONTH
    IntervalYM(IntervalYM),
    /// INTERVAL DAY TO SECOND
    IntervalDT(IntervalDT),
    /// BLOB or CLOB handle
    Lob(LobLocator),
    /// Cursor opened by the server
    Cursor(CursorRef),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(*b as i64),
            Value::Decimal(d) => d.to_i64().ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(d.to_f64()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as a decimal
    pub fn as_decimal(&self) -> Option<&Decimal> {
        match self {
            Value::Decimal(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as a datetime
    pub fn as_datetime(&self) -> Option<&DmDateTime> {
        match self {
            Value::DateTime(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as a naive date-time
    pub fn as_naive_datetime(&self) -> Option<NaiveDateTime> {
        self.as_datetime().and_then(|d| d.to_naive().ok())
    }

    /// Try to get as a year-month interval
    pub fn as_interval_ym(&self) -> Option<&IntervalYM> {
        match self {
            Value::IntervalYM(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as a day-second interval
    pub fn as_interval_dt(&self) -> Option<&IntervalDT> {
        match self {
            Value::IntervalDT(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as a LOB handle
    pub fn as_lob(&self) -> Option<&LobLocator> {
        match self {
            Value::Lob(l) => Some(l),
            _ => None,
        }
    }

    /// Try to get as a cursor
    pub fn as_cursor(&self) -> Option<CursorRef> {
        match self {
            Value::Cursor(c) => Some(*c),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    i8 => Integer as i64,
    i16 => Integer as i64,
    i32 => Integer as i64,
    i64 => Integer,
    u8 => Integer as i64,
    u16 => Integer as i64,
    u32 => Integer as i64,
    f32 => Float as f64,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    Decimal => Decimal,
    DmDateTime => DateTime,
    IntervalYM => IntervalYM,
    IntervalDT => IntervalDT,
    LobLocator => Lob,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v.into())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::DateTime(v.into())
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::DateTime(v.into())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTime(v.into())
    }
}

impl TryFrom<TimeDelta> for Value {
    type Error = Error;

    fn try_from(v: TimeDelta) -> Result<Self> {
        Ok(Value::IntervalDT(IntervalDT::from_delta(v)?))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

fn conversion(value: &Value, target: &str) -> Error {
    match value {
        Value::Null => Error::IsNull,
        other => Error::UnsupportedScan(format!("cannot read {other:?} as {target}")),
    }
}

impl TryFrom<&Value> for i64 {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        v.as_i64().ok_or_else(|| conversion(v, "i64"))
    }
}

impl TryFrom<&Value> for i32 {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        let n = i64::try_from(v)?;
        i32::try_from(n).map_err(|_| Error::DataConversion(format!("{n} does not fit i32")))
    }
}

impl TryFrom<&Value> for f64 {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        v.as_f64().ok_or_else(|| conversion(v, "f64"))
    }
}

impl TryFrom<&Value> for bool {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        v.as_bool().ok_or_else(|| conversion(v, "bool"))
    }
}

impl TryFrom<&Value> for String {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        match v {
            Value::Null | Value::Lob(_) | Value::Cursor(_) | Value::Bytes(_) => Err(conversion(v, "String")),
            other => Ok(other.to_string()),
        }
    }
}

impl TryFrom<&Value> for Vec<u8> {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        v.as_bytes().map(<[u8]>::to_vec).ok_or_else(|| conversion(v, "bytes"))
    }
}

impl TryFrom<&Value> for NaiveDateTime {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        v.as_datetime()
            .ok_or_else(|| conversion(v, "NaiveDateTime"))?
            .to_naive()
    }
}

impl TryFrom<&Value> for Decimal {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        match v {
            Value::Decimal(d) => Ok(d.clone()),
            Value::Integer(i) => Ok(Decimal::from(*i)),
            Value::Float(f) => Decimal::try_from(*f),
            Value::String(s) => s.parse(),
            other => Err(conversion(other, "Decimal")),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::DateTime(d) => write!(f, "{d}"),
            Value::IntervalYM(v) => write!(f, "{v}"),
            Value::IntervalDT(v) => write!(f, "{v}"),
            Value::Lob(lob) if lob.in_row => write!(f, "<LOB: {} inline>", lob.length),
            Value::Lob(lob) => write!(f, "<LOB: {}, id={}>", lob.length, lob.blob_id),
            Value::Cursor(c) => write!(f, "<CURSOR: stmt={}>", c.stmt_id),
        }
    }
}

/// A row of data from a query result.
///
/// Values are accessed by 0-based column index or by column name (case
/// insensitive).
///
/// ```rust,no_run
/// # async fn example(conn: dm_rs::Connection) -> dm_rs::Result<()> {
/// let result = conn.query("SELECT id, name FROM employees", &[]).await?;
/// for row in &result.rows {
///     let id = row.get_i64(0).unwrap_or_default();
///     let name = row.get_by_name("name").and_then(|v| v.as_str()).unwrap_or("");
///     println!("{id}: {name}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    column_names: Option<Arc<[String]>>,
    rowid: i64,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            column_names: None,
            rowid: 0,
        }
    }

    /// Create a new row with values and shared column names
    pub fn with_names(values: Vec<Value>, names: Arc<[String]>) -> Self {
        Self {
            values,
            column_names: Some(names),
            rowid: 0,
        }
    }

    pub(crate) fn with_rowid(mut self, rowid: i64) -> Self {
        self.rowid = rowid;
        self
    }

    /// Server row identifier
    pub fn rowid(&self) -> i64 {
        self.rowid
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let names = self.column_names.as_ref()?;
        let index = names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Convert a column into `T`
    pub fn try_get<'a, T>(&'a self, index: usize) -> Result<T>
    where
        T: TryFrom<&'a Value, Error = Error>,
    {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::UnsupportedScan(format!("column index {index} out of range")))?;
        T::try_from(value)
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Try to get a string value by index
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Try to get an integer value by index
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    /// Try to get a float value by index
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    /// Try to get a boolean value by index
    pub fn get_bool(&self, index: usize) -> Option<bool> {
        self.get(index).and_then(Value::as_bool)
    }

    /// Check if a column value is NULL
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map(Value::is_null).unwrap_or(true)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

/// Session properties the cell decoder depends on
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    /// Server character set
    pub encoding: Encoding,
    /// LOB cells carry the extended locator
    pub new_lob: bool,
}

fn signed(cell: &[u8], code: i32) -> Result<i64> {
    Ok(match cell.len() {
        1 => cell[0] as i8 as i64,
        2 => i16::from_be_bytes([cell[0], cell[1]]) as i64,
        4 => i32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]) as i64,
        8 => i64::from_be_bytes([cell[0], cell[1], cell[2], cell[3], cell[4], cell[5], cell[6], cell[7]]),
        n => {
            return Err(Error::DataConversion(format!(
                "{} cell of {n} bytes",
                col_type::name(code)
            )))
        }
    })
}

fn float(cell: &[u8], code: i32) -> Result<f64> {
    match cell.len() {
        4 => Ok(f32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]) as f64),
        8 => Ok(f64::from_be_bytes([cell[0], cell[1], cell[2], cell[3], cell[4], cell[5], cell[6], cell[7]])),
        n => Err(Error::DataConversion(format!("{} cell of {n} bytes", col_type::name(code)))),
    }
}

/// Decode one cell of column type `code`
pub fn decode_cell(code: i32, cell: Option<&[u8]>, ctx: DecodeContext) -> Result<Value> {
    let Some(cell) = cell else {
        return Ok(Value::Null);
    };
    Ok(match code {
        col_type::NULL => Value::Null,
        col_type::BIT | col_type::BOOLEAN => Value::Boolean(signed(cell, code)? != 0),
        col_type::TINYINT | col_type::SMALLINT | col_type::INT | col_type::BIGINT => {
            Value::Integer(signed(cell, code)?)
        }
        col_type::REAL | col_type::DOUBLE => Value::Float(float(cell, code)?),
        col_type::DECIMAL => Value::Decimal(Decimal::from_wire(cell)?),
        col_type::CHAR | col_type::VARCHAR | col_type::VARCHAR2 => Value::String(ctx.encoding.decode(cell)?),
        col_type::BINARY | col_type::VARBINARY | col_type::ARRAY | col_type::CLASS => Value::Bytes(cell.to_vec()),
        col_type::BLOB | col_type::CLOB => {
            Value::Lob(LobLocator::from_cell(cell, code == col_type::CLOB, ctx.new_lob)?)
        }
        c if col_type::is_datetime(c) => Value::DateTime(DmDateTime::from_wire(cell, c)?),
        col_type::INTERVAL_YM => Value::IntervalYM(IntervalYM::from_wire(cell)?),
        col_type::INTERVAL_DT => Value::IntervalDT(IntervalDT::from_wire(cell)?),
        col_type::CURSOR => Value::Cursor(CursorRef {
            stmt_id: signed(cell, code)? as i32,
        }),
        other => return Err(Error::UnsupportedOutParamType(col_type::name(other).to_string())),
    })
}
