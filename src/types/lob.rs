//! LOB (Large Object) handles
//!
//! A LOB cell carries a handle that is either in-row (the value follows the
//! handle inside the cell) or out-of-row (the value must be read through the
//! LOB sub-protocol). The handle layout depends on whether the session uses
//! extended LOB locators.

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::constants::lob_flags;
use crate::encoding::Encoding;
use crate::error::{Error, Result};

/// Result of reading LOB data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobData {
    /// Character data (from CLOB)
    String(String),
    /// Binary data (from BLOB)
    Bytes(Bytes),
}

impl LobData {
    /// Get as string (for CLOB)
    pub fn as_string(&self) -> Option<&str> {
        match self {
            LobData::String(s) => Some(s),
            LobData::Bytes(_) => None,
        }
    }

    /// Get as bytes (for BLOB)
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            LobData::Bytes(b) => Some(b),
            LobData::String(_) => None,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        match self {
            LobData::String(s) => s.len(),
            LobData::Bytes(b) => b.len(),
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extended locator fields present when the session negotiated new LOB handles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LobExtension {
    /// Owning table id
    pub tab_id: i32,
    /// Owning column id
    pub col_id: i16,
    /// Owning row id
    pub row_id: i64,
    /// Extended group id
    pub ex_group_id: i16,
    /// Extended file id
    pub ex_file_id: i16,
    /// Extended page number
    pub ex_page_no: i32,
}

/// Handle to a BLOB or CLOB value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// Value is embedded in the row
    pub in_row: bool,
    /// Server blob id
    pub blob_id: i64,
    /// Storage group id
    pub group_id: i16,
    /// Storage file id
    pub file_id: i16,
    /// Storage page number
    pub page_no: i32,
    /// Extended fields (new LOB protocol only)
    pub ext: Option<LobExtension>,
    /// Length in bytes (BLOB) or characters (CLOB)
    pub length: i64,
    /// Character LOB
    pub is_clob: bool,
    inline: Option<Bytes>,
    freed: bool,
}

impl LobLocator {
    /// Parse a LOB cell
    pub fn from_cell(cell: &[u8], is_clob: bool, new_lob: bool) -> Result<Self> {
        let mut buf = ByteBuffer::from_slice(cell);
        let flag = buf.read_u8()?;
        let in_row = match flag {
            lob_flags::IN_ROW => true,
            lob_flags::OFF_ROW => false,
            other => return Err(Error::Protocol(format!("unknown lob disposition {other}"))),
        };
        let blob_id = buf.read_i64()?;
        let group_id = buf.read_i16()?;
        let file_id = buf.read_i16()?;
        let page_no = buf.read_i32()?;
        let ext = if new_lob {
            Some(LobExtension {
                tab_id: buf.read_i32()?,
                col_id: buf.read_i16()?,
                row_id: buf.read_i64()?,
                ex_group_id: buf.read_i16()?,
                ex_file_id: buf.read_i16()?,
                ex_page_no: buf.read_i32()?,
            })
        } else {
            None
        };
        let length = if new_lob { buf.read_i64()? } else { buf.read_i32()? as i64 };
        let inline = in_row.then(|| Bytes::copy_from_slice(buf.remaining_slice()));
        Ok(Self {
            in_row,
            blob_id,
            group_id,
            file_id,
            page_no,
            ext,
            length,
            is_clob,
            inline,
            freed: false,
        })
    }

    /// Build a LOB cell (used by test servers)
    pub fn to_cell(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.write_u8(if self.in_row { lob_flags::IN_ROW } else { lob_flags::OFF_ROW });
        buf.write_i64(self.blob_id);
        buf.write_i16(self.group_id);
        buf.write_i16(self.file_id);
        buf.write_i32(self.page_no);
        match &self.ext {
            Some(ext) => {
                write_ext(&mut buf, ext);
                buf.write_i64(self.length);
            }
            None => buf.write_i32(self.length as i32),
        }
        if let Some(data) = &self.inline {
            buf.write_bytes(data);
        }
        buf.into_vec()
    }

    /// Create an out-of-row handle
    pub fn off_row(blob_id: i64, length: i64, is_clob: bool, ext: Option<LobExtension>) -> Self {
        Self {
            in_row: false,
            blob_id,
            group_id: 0,
            file_id: 0,
            page_no: 0,
            ext,
            length,
            is_clob,
            inline: None,
            freed: false,
        }
    }

    /// Create an in-row handle with its data
    pub fn in_row_value(data: impl Into<Bytes>, length: i64, is_clob: bool, ext: Option<LobExtension>) -> Self {
        Self {
            in_row: true,
            inline: Some(data.into()),
            ..Self::off_row(0, length, is_clob, ext)
        }
    }

    /// Inline bytes of an in-row value
    pub fn inline_data(&self) -> Option<&Bytes> {
        self.inline.as_ref()
    }

    /// Decode the full inline value
    pub fn inline_value(&self, encoding: Encoding) -> Result<Option<LobData>> {
        let Some(data) = &self.inline else {
            return Ok(None);
        };
        Ok(Some(if self.is_clob {
            LobData::String(encoding.decode(data)?)
        } else {
            LobData::Bytes(data.clone())
        }))
    }

    /// Replace an out-of-row value with data read in full
    pub(crate) fn materialize(&mut self, data: Bytes) {
        self.inline = Some(data);
    }

    /// Mark the handle unusable
    pub fn free(&mut self) {
        self.freed = true;
        self.inline = None;
    }

    /// Fail if the handle was freed
    pub fn check_live(&self) -> Result<()> {
        if self.freed {
            Err(Error::LobFreed)
        } else {
            Ok(())
        }
    }

    /// Write the server-side address used by LOB operations
    pub fn write_handle(&self, buf: &mut ByteBuffer, new_lob: bool) {
        buf.write_i64(self.blob_id);
        buf.write_i16(self.group_id);
        buf.write_i16(self.file_id);
        buf.write_i32(self.page_no);
        if new_lob {
            write_ext(buf, &self.ext.unwrap_or_default());
        }
    }

    /// Read the server-side address (used by test servers)
    pub fn read_handle(buf: &mut ByteBuffer, is_clob: bool, new_lob: bool) -> Result<Self> {
        let blob_id = buf.read_i64()?;
        let group_id = buf.read_i16()?;
        let file_id = buf.read_i16()?;
        let page_no = buf.read_i32()?;
        let ext = if new_lob {
            Some(LobExtension {
                tab_id: buf.read_i32()?,
                col_id: buf.read_i16()?,
                row_id: buf.read_i64()?,
                ex_group_id: buf.read_i16()?,
                ex_file_id: buf.read_i16()?,
                ex_page_no: buf.read_i32()?,
            })
        } else {
            None
        };
        Ok(Self {
            group_id,
            file_id,
            page_no,
            ..Self::off_row(blob_id, 0, is_clob, ext)
        })
    }
}

fn write_ext(buf: &mut ByteBuffer, ext: &LobExtension) {
    buf.write_i32(ext.tab_id);
    buf.write_i16(ext.col_id);
    buf.write_i64(ext.row_id);
    buf.write_i16(ext.ex_group_id);
    buf.write_i16(ext.ex_file_id);
    buf.write_i32(ext.ex_page_no);
}
