//! FIFO byte pipe used to stage piecewise LOB input

use std::collections::VecDeque;
use std::io::Write;

use bytes::Bytes;

use super::ByteBuffer;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Chunk {
    data: Bytes,
    offset: usize,
    remaining: usize,
}

impl Chunk {
    fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.remaining]
    }

    fn consume(&mut self, n: usize) {
        self.offset += n;
        self.remaining -= n;
    }
}

/// An ordered queue of byte chunks with a running total length
#[derive(Debug, Default, Clone)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    total: usize,
}

impl ChunkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes still queued
    pub fn total_len(&self) -> usize {
        self.total
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Append a whole chunk
    pub fn push(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        let len = data.len();
        if len > 0 {
            self.total += len;
            self.chunks.push_back(Chunk {
                data,
                offset: 0,
                remaining: len,
            });
        }
    }

    /// Append `count` bytes of `data` starting at `offset`
    pub fn push_range(&mut self, data: impl Into<Bytes>, offset: usize, count: usize) -> Result<()> {
        let data = data.into();
        if offset.checked_add(count).map_or(true, |end| end > data.len()) {
            return Err(Error::InvalidLengthOrOffset);
        }
        if count > 0 {
            self.total += count;
            self.chunks.push_back(Chunk {
                data,
                offset,
                remaining: count,
            });
        }
        Ok(())
    }

    /// Copy at most `n` bytes into `buf`, returning how many were moved
    pub fn read_into(&mut self, buf: &mut ByteBuffer, n: usize) -> usize {
        self.drain_with(n, |bytes| {
            buf.write_bytes(bytes);
            Ok(())
        })
        .unwrap_or(0)
    }

    /// Stream at most `n` bytes into `writer`, returning how many were written
    pub fn read_into_writer<W: Write>(&mut self, writer: &mut W, n: usize) -> Result<usize> {
        self.drain_with(n, |bytes| writer.write_all(bytes).map_err(Error::from))
    }

    /// Remove and return every remaining byte as one contiguous vector
    pub fn drain_to_vec(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(chunk.as_slice());
        }
        self.total = 0;
        out
    }

    fn drain_with<F>(&mut self, n: usize, mut sink: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut moved = 0;
        while moved < n {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let take = front.remaining.min(n - moved);
            sink(&front.as_slice()[..take])?;
            front.consume(take);
            moved += take;
            self.total -= take;
            if front.remaining == 0 {
                self.chunks.pop_front();
            }
        }
        Ok(moved)
    }
}
