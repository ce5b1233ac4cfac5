//! Buffer abstractions for DM protocol encoding/decoding
//!
//! [`ByteBuffer`] is the framed byte buffer every codec path writes into and
//! reads out of: a grow-on-write byte container with an independent read
//! cursor. [`ChunkQueue`] is the FIFO byte pipe used to stage piecewise LOB
//! input before it is cut into fixed-size server chunks.
//!
//! All multi-byte primitives are big-endian.

mod chunk;
mod read;
mod write;

pub use chunk::ChunkQueue;

use crate::error::{Error, Result};

/// Default initial capacity of a session buffer
pub const DEFAULT_CAPACITY: usize = 8192;

/// A growable byte buffer with a read cursor.
///
/// Invariant: `0 <= position <= len <= capacity`. Writes append at the tail;
/// reads advance the cursor; `get_*_at`/`set_*_at` address explicit offsets
/// without moving it.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    /// Bytes `[0, len)` are live
    data: Vec<u8>,
    /// Logical capacity, grown by `max(2 * cap, len + n)`
    cap: usize,
    /// Read cursor
    pos: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty buffer with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cap: capacity,
            pos: 0,
        }
    }

    /// Create a buffer holding a copy of `bytes`, cursor at 0
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            cap: bytes.len(),
            pos: 0,
        }
    }

    /// Create a buffer that takes ownership of `bytes`, cursor at 0
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let cap = bytes.len();
        Self {
            data: bytes,
            cap,
            pos: 0,
        }
    }

    /// Number of live bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Logical capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Current read position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes between the cursor and the end of the live region
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move the read cursor
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::BufferUnderflow {
                needed: pos,
                available: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Live bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the live bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes from the cursor to the end
    pub fn remaining_slice(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Consume the buffer, returning the live bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Grow the logical capacity so that `n` more bytes fit
    pub(crate) fn ensure_writable(&mut self, n: usize) {
        let needed = self.data.len() + n;
        if needed > self.cap {
            let new_cap = std::cmp::max(self.cap.saturating_mul(2), needed);
            self.data.reserve_exact(new_cap - self.data.len());
            self.cap = new_cap;
        }
    }

    #[inline]
    pub(crate) fn check_range(&self, offset: usize, n: usize) -> Result<()> {
        if offset.checked_add(n).map_or(true, |end| end > self.data.len()) {
            return Err(Error::BufferUnderflow {
                needed: offset.saturating_add(n),
                available: self.data.len(),
            });
        }
        Ok(())
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
