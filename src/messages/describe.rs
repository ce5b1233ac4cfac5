//! Parameter and column descriptors
//!
//! Descriptors travel in prepare, describe and execute replies. The client
//! echoes parameter descriptors back in the `Execute2` block.

use crate::buffer::ByteBuffer;
use crate::constants::{col_type, scale_mask, IoType};
use crate::error::Result;

use super::WireContext;

fn has_type_descriptor(code: i32) -> bool {
    matches!(code, col_type::ARRAY | col_type::CLASS)
}

/// Parameter metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    /// Column type code
    pub col_type: i32,
    /// Precision (bytes for character and binary types)
    pub prec: i32,
    /// Scale, with subtype bits above [`scale_mask::SCALE_BITS`]
    pub scale: i32,
    /// Parameter accepts NULL
    pub nullable: bool,
    /// Direction
    pub io_type: IoType,
    /// Default/flag bits
    pub flags: u16,
    /// Descriptor blob for composite types
    pub type_desc: Option<Vec<u8>>,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            col_type: col_type::VARCHAR,
            prec: 0,
            scale: 0,
            nullable: true,
            io_type: IoType::In,
            flags: 0,
            type_desc: None,
        }
    }
}

impl ParamInfo {
    /// Create an input parameter descriptor
    pub fn input(col_type: i32, prec: i32, scale: i32) -> Self {
        Self {
            col_type,
            prec,
            scale,
            ..Default::default()
        }
    }

    /// Decode one descriptor
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let col_type = buf.read_i32()?;
        let prec = buf.read_i32()?;
        let scale = buf.read_i32()?;
        let nullable = buf.read_bool()?;
        let io_type = IoType::from(buf.read_u8()?);
        let flags = buf.read_u16()?;
        let type_desc = if has_type_descriptor(col_type) {
            Some(buf.read_bytes_with_u32_len()?)
        } else {
            None
        };
        Ok(Self {
            col_type,
            prec,
            scale,
            nullable,
            io_type,
            flags,
            type_desc,
        })
    }

    /// Encode one descriptor
    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_i32(self.col_type);
        buf.write_i32(self.prec);
        buf.write_i32(self.scale);
        buf.write_u8(self.nullable as u8);
        buf.write_u8(self.io_type as u8);
        buf.write_u16(self.flags);
        if has_type_descriptor(self.col_type) {
            buf.write_bytes_with_u32_len(self.type_desc.as_deref().unwrap_or(&[]));
        }
    }

    /// Scale without subtype bits
    pub fn pure_scale(&self) -> i32 {
        self.scale & scale_mask::SCALE_BITS
    }

    /// Check a subtype bit
    pub fn has_mask(&self, mask: i32) -> bool {
        self.scale & mask != 0
    }
}

/// Result-set column metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnInfo {
    /// Column type code
    pub col_type: i32,
    /// Precision
    pub prec: i32,
    /// Scale, with subtype bits
    pub scale: i32,
    /// Column accepts NULL
    pub nullable: bool,
    /// Column holds LOB locators
    pub lob: bool,
    /// Identity column
    pub identity: bool,
    /// Read-only column
    pub readonly: bool,
    /// Column label
    pub name: String,
    /// Server type name
    pub type_name: String,
    /// Source table
    pub table_name: String,
    /// Source schema
    pub schema_name: String,
    /// Base column name (only when requested at prepare)
    pub base_name: Option<String>,
    /// LOB table id
    pub lob_tab_id: i32,
    /// LOB column id
    pub lob_col_id: i16,
    /// Descriptor blob for composite types
    pub type_desc: Option<Vec<u8>>,
}

impl ColumnInfo {
    /// Create a column descriptor with a name and type
    pub fn new(name: impl Into<String>, col_type: i32) -> Self {
        Self {
            col_type,
            name: name.into(),
            type_name: col_type::name(col_type).to_string(),
            nullable: true,
            lob: col_type::is_lob(col_type),
            ..Default::default()
        }
    }

    /// Decode one descriptor
    pub fn read(buf: &mut ByteBuffer, ctx: &WireContext, with_base_name: bool) -> Result<Self> {
        let col_type = buf.read_i32()?;
        let prec = buf.read_i32()?;
        let scale = buf.read_i32()?;
        let nullable = buf.read_bool()?;
        let lob = buf.read_bool()?;
        let identity = buf.read_bool()?;
        let readonly = buf.read_bool()?;
        let name = buf.read_string(ctx.encoding)?;
        let type_name = buf.read_string(ctx.encoding)?;
        let table_name = buf.read_string(ctx.encoding)?;
        let schema_name = buf.read_string(ctx.encoding)?;
        let base_name = if with_base_name {
            Some(buf.read_string(ctx.encoding)?)
        } else {
            None
        };
        let (lob_tab_id, lob_col_id) = if lob {
            (buf.read_i32()?, buf.read_i16()?)
        } else {
            (0, 0)
        };
        let type_desc = if has_type_descriptor(col_type) {
            Some(buf.read_bytes_with_u32_len()?)
        } else {
            None
        };
        Ok(Self {
            col_type,
            prec,
            scale,
            nullable,
            lob,
            identity,
            readonly,
            name,
            type_name,
            table_name,
            schema_name,
            base_name,
            lob_tab_id,
            lob_col_id,
            type_desc,
        })
    }

    /// Encode one descriptor
    pub fn write(&self, buf: &mut ByteBuffer, ctx: &WireContext, with_base_name: bool) {
        buf.write_i32(self.col_type);
        buf.write_i32(self.prec);
        buf.write_i32(self.scale);
        buf.write_u8(self.nullable as u8);
        buf.write_u8(self.lob as u8);
        buf.write_u8(self.identity as u8);
        buf.write_u8(self.readonly as u8);
        buf.write_string(&self.name, ctx.encoding);
        buf.write_string(&self.type_name, ctx.encoding);
        buf.write_string(&self.table_name, ctx.encoding);
        buf.write_string(&self.schema_name, ctx.encoding);
        if with_base_name {
            buf.write_string(self.base_name.as_deref().unwrap_or(""), ctx.encoding);
        }
        if self.lob {
            buf.write_i32(self.lob_tab_id);
            buf.write_i16(self.lob_col_id);
        }
        if has_type_descriptor(self.col_type) {
            buf.write_bytes_with_u32_len(self.type_desc.as_deref().unwrap_or(&[]));
        }
    }

    /// Scale without subtype bits
    pub fn pure_scale(&self) -> i32 {
        self.scale & scale_mask::SCALE_BITS
    }

    /// Check a subtype bit
    pub fn has_mask(&self, mask: i32) -> bool {
        self.scale & mask != 0
    }

    /// Approximate bytes one value of this column occupies on the wire
    pub fn wire_size(&self) -> usize {
        match self.col_type {
            col_type::BIT | col_type::BOOLEAN | col_type::TINYINT => 1,
            col_type::SMALLINT => 2,
            col_type::INT | col_type::REAL => 4,
            col_type::BIGINT | col_type::DOUBLE => 8,
            col_type::DECIMAL => 22,
            col_type::INTERVAL_YM => 12,
            col_type::INTERVAL_DT => 24,
            code if col_type::is_datetime(code) => 13,
            code if col_type::is_lob(code) => 64,
            _ => self.prec.clamp(1, 8188) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_descriptor_layout() {
        let p = ParamInfo {
            io_type: IoType::InOut,
            ..ParamInfo::input(col_type::INT, 10, 0)
        };
        let mut buf = ByteBuffer::new();
        p.write(&mut buf);
        assert_eq!(buf.len(), 4 + 4 + 4 + 1 + 1 + 2);
        assert_eq!(buf.as_slice()[13], IoType::InOut as u8);
        assert_eq!(ParamInfo::read(&mut buf).unwrap(), p);
    }

    #[test]
    fn test_lob_column_carries_ids() {
        let ctx = WireContext::default();
        let mut c = ColumnInfo::new("DOC", col_type::CLOB);
        c.lob_tab_id = 1024;
        c.lob_col_id = 3;
        let mut buf = ByteBuffer::new();
        c.write(&mut buf, &ctx, true);
        let parsed = ColumnInfo::read(&mut buf, &ctx, true).unwrap();
        assert_eq!(parsed.lob_tab_id, 1024);
        assert_eq!(parsed.base_name.as_deref(), Some(""));
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_scale_mask_bits() {
        let p = ParamInfo::input(col_type::DATETIME, 8, 6 | scale_mask::LOCAL_DATETIME);
        assert_eq!(p.pure_scale(), 6);
        assert!(p.has_mask(scale_mask::LOCAL_DATETIME));
        assert!(!p.has_mask(scale_mask::ORACLE_DATE));
    }
}
