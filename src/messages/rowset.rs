//! Row wire encodings
//!
//! Rows arrive either row-wise (one rowid followed by length-tagged cells) or
//! in BDTA columnar form (per column: a not-null flag, an optional null
//! bitmap, then the non-null values back to back). Both are decoded into the
//! same [`RawRow`] shape; typed conversion happens later in [`crate::row`].

use crate::buffer::ByteBuffer;
use crate::constants::{col_type, length};
use crate::error::{Error, Result};

use super::ColumnInfo;

/// One undecoded row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// Server row id (0 for BDTA rows)
    pub rowid: i64,
    /// Cell bytes per column; `None` is NULL
    pub cells: Vec<Option<Vec<u8>>>,
}

impl RawRow {
    /// Approximate in-memory size in bytes
    pub fn byte_size(&self) -> usize {
        8 + self
            .cells
            .iter()
            .map(|c| c.as_ref().map_or(1, |v| v.len() + 1))
            .sum::<usize>()
    }
}

/// Fixed value width of a type in BDTA form; `None` for length-tagged types
pub fn bdta_fixed_len(code: i32) -> Option<usize> {
    match code {
        col_type::INT
        | col_type::BIT
        | col_type::TINYINT
        | col_type::SMALLINT
        | col_type::BOOLEAN
        | col_type::NULL
        | col_type::REAL => Some(4),
        col_type::BIGINT | col_type::DOUBLE => Some(8),
        col_type::DATE
        | col_type::TIME
        | col_type::DATETIME
        | col_type::TIME_TZ
        | col_type::DATETIME_TZ
        | col_type::INTERVAL_YM => Some(12),
        col_type::DATETIME2 | col_type::DATETIME2_TZ => Some(13),
        col_type::INTERVAL_DT => Some(24),
        _ => None,
    }
}

/// Decode `[count:i32]` row-wise rows with `col_count` cells each
pub fn read_row_wise(buf: &mut ByteBuffer, col_count: usize) -> Result<Vec<RawRow>> {
    let count = read_count(buf)?;
    let mut rows = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let rowid = buf.read_i64()?;
        let mut cells = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            cells.push(buf.read_cell()?);
        }
        rows.push(RawRow { rowid, cells });
    }
    Ok(rows)
}

/// Encode row-wise rows
pub fn write_row_wise(buf: &mut ByteBuffer, rows: &[RawRow]) {
    buf.write_i32(rows.len() as i32);
    for row in rows {
        buf.write_i64(row.rowid);
        for cell in &row.cells {
            buf.write_cell(cell.as_deref());
        }
    }
}

/// Decode a BDTA block against the column descriptors
pub fn read_bdta(buf: &mut ByteBuffer, columns: &[ColumnInfo]) -> Result<Vec<RawRow>> {
    let row_count = read_count(buf)?;
    let col_count = buf.read_i16()?;
    if col_count as usize != columns.len() {
        return Err(Error::Protocol(format!(
            "bdta column count {col_count} does not match {} described columns",
            columns.len()
        )));
    }

    let mut rows: Vec<RawRow> = (0..row_count)
        .map(|_| RawRow {
            rowid: 0,
            cells: Vec::with_capacity(columns.len()),
        })
        .collect();

    for column in columns {
        let all_not_null = buf.read_bool()?;
        let bitmap = if all_not_null {
            None
        } else {
            Some(buf.read_slice(row_count.div_ceil(8))?.to_vec())
        };
        let fixed = bdta_fixed_len(column.col_type);
        for (i, row) in rows.iter_mut().enumerate() {
            let is_null = bitmap
                .as_ref()
                .is_some_and(|bits| bits[i / 8] & (1 << (i % 8)) != 0);
            if is_null {
                row.cells.push(None);
                continue;
            }
            let value = match fixed {
                Some(n) => buf.read_bytes(n)?,
                None => read_var_value(buf)?,
            };
            row.cells.push(Some(value));
        }
    }
    Ok(rows)
}

/// Encode rows as a BDTA block
pub fn write_bdta(buf: &mut ByteBuffer, columns: &[ColumnInfo], rows: &[RawRow]) -> Result<()> {
    buf.write_i32(rows.len() as i32);
    buf.write_i16(columns.len() as i16);
    for (c, column) in columns.iter().enumerate() {
        fn cell_at(r: &RawRow, c: usize) -> Option<&[u8]> {
            r.cells.get(c).and_then(|v| v.as_deref())
        }
        let cell = |r| cell_at(r, c);
        let all_not_null = rows.iter().all(|r| cell(r).is_some());
        buf.write_u8(all_not_null as u8);
        if !all_not_null {
            let mut bits = vec![0u8; rows.len().div_ceil(8)];
            for (i, row) in rows.iter().enumerate() {
                if cell(row).is_none() {
                    bits[i / 8] |= 1 << (i % 8);
                }
            }
            buf.write_bytes(&bits);
        }
        let fixed = bdta_fixed_len(column.col_type);
        for value in rows.iter().filter_map(cell) {
            match fixed {
                Some(n) => buf.write_bytes(&widen(value, n, column.col_type)?),
                None => write_var_value(buf, value),
            }
        }
    }
    Ok(())
}

fn read_count(buf: &mut ByteBuffer) -> Result<usize> {
    let count = buf.read_i32()?;
    usize::try_from(count).map_err(|_| Error::Protocol(format!("negative row count {count}")))
}

fn read_var_value(buf: &mut ByteBuffer) -> Result<Vec<u8>> {
    let n = match buf.read_u16()? {
        length::LONG => buf.read_u32()? as usize,
        n => n as usize,
    };
    buf.read_bytes(n)
}

fn write_var_value(buf: &mut ByteBuffer, value: &[u8]) {
    if value.len() > length::SHORT_MAX {
        buf.write_u16(length::LONG);
        buf.write_u32(value.len() as u32);
    } else {
        buf.write_u16(value.len() as u16);
    }
    buf.write_bytes(value);
}

/// Sign-extend a short integer cell (and zero-pad everything else) to the BDTA width
fn widen(value: &[u8], width: usize, code: i32) -> Result<Vec<u8>> {
    if value.len() == width {
        return Ok(value.to_vec());
    }
    if value.len() > width {
        return Err(Error::DataConversion(format!(
            "{}-byte value does not fit {} bdta slot",
            value.len(),
            col_type::name(code)
        )));
    }
    let integral = matches!(
        code,
        col_type::BIT | col_type::TINYINT | col_type::SMALLINT | col_type::INT | col_type::BOOLEAN
    );
    let mut out = Vec::with_capacity(width);
    if integral {
        let fill = if value.first().is_some_and(|b| b & 0x80 != 0) { 0xFF } else { 0 };
        out.resize(width - value.len(), fill);
        out.extend_from_slice(value);
    } else {
        out.extend_from_slice(value);
        out.resize(width, 0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("ID", col_type::INT),
            ColumnInfo::new("NAME", col_type::VARCHAR),
        ]
    }

    #[test]
    fn test_row_wise_null_and_long() {
        let long = vec![7u8; 0xFF01];
        let rows = vec![RawRow {
            rowid: 42,
            cells: vec![None, Some(long.clone())],
        }];
        let mut buf = ByteBuffer::new();
        write_row_wise(&mut buf, &rows);
        // count + rowid + null tag + long tag + u32 len + payload
        assert_eq!(buf.len(), 4 + 8 + 2 + 2 + 4 + long.len());
        assert_eq!(read_row_wise(&mut buf, 2).unwrap(), rows);
    }

    #[test]
    fn test_bdta_bitmap_skips_null_values() {
        let rows = vec![
            RawRow { rowid: 0, cells: vec![Some(1i32.to_be_bytes().to_vec()), None] },
            RawRow { rowid: 0, cells: vec![Some(2i32.to_be_bytes().to_vec()), Some(b"b".to_vec())] },
            RawRow { rowid: 0, cells: vec![Some(3i32.to_be_bytes().to_vec()), None] },
        ];
        let mut buf = ByteBuffer::new();
        write_bdta(&mut buf, &cols(), &rows).unwrap();

        // header(6) + col0 flag(1) + 3*4 + col1 flag(1) + bitmap(1) + one value(2+1)
        assert_eq!(buf.len(), 6 + 1 + 12 + 1 + 1 + 3);
        assert_eq!(buf.as_slice()[6 + 1 + 12 + 1], 0b101);
        assert_eq!(read_bdta(&mut buf, &cols()).unwrap(), rows);
    }

    #[test]
    fn test_bdta_widens_small_ints() {
        let columns = vec![ColumnInfo::new("T", col_type::TINYINT)];
        let rows = vec![RawRow { rowid: 0, cells: vec![Some(vec![0xFF])] }];
        let mut buf = ByteBuffer::new();
        write_bdta(&mut buf, &columns, &rows).unwrap();
        let parsed = read_bdta(&mut buf, &columns).unwrap();
        assert_eq!(parsed[0].cells[0].as_deref(), Some(&[0xFF, 0xFF, 0xFF, 0xFF][..]));
    }

    #[test]
    fn test_bdta_column_mismatch() {
        let mut buf = ByteBuffer::new();
        buf.write_i32(0);
        buf.write_i16(3);
        assert!(matches!(read_bdta(&mut buf, &cols()), Err(Error::Protocol(_))));
    }
}
