//! Streaming result sets
//!
//! [`Rows`] hands out decoded rows from the current window and fetches the
//! next window from the server when it runs dry. The byte budget of each fetch
//! follows the observed row size so wide rows come back in fewer round trips.
//!
//! ```rust,no_run
//! # async fn demo(conn: &dm_rs::Connection) -> dm_rs::Result<()> {
//! let mut rows = conn.query_rows("SELECT id, name FROM users", &[]).await?;
//! while let Some(row) = rows.next().await? {
//!     println!("{:?}", row.get_i64(0));
//! }
//! rows.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::connection::ConnCore;
use crate::constants::limits;
use crate::error::{Error, Result};
use crate::messages::{ColumnInfo, ExecInfo, FetchMessage, RawRow, ResultSegment};
use crate::row::{decode_cell, DecodeContext, Row};
use crate::session::Session;

/// Where a result set came from, for staleness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// One-shot statement owned by the result set
    Direct,
    /// A prepared statement at a given execution
    Statement { key: u64, exec_seq: u64 },
    /// A cursor returned by a procedure
    Cursor,
    /// Served from the result cache
    Cached,
}

/// Settings a result set inherits from its statement
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowsSettings {
    pub fetch_size: i32,
    pub buf_prefetch: i32,
    pub max_rows: i64,
    pub decode: DecodeContext,
    pub fetch_lobs: bool,
    pub read_base_col: bool,
}

/// A forward-only stream of rows
#[derive(Debug)]
pub struct Rows {
    core: Weak<ConnCore>,
    session: Option<Arc<Session>>,
    stmt_id: i32,
    origin: Origin,
    owns_stmt: bool,
    columns: Vec<ColumnInfo>,
    names: Arc<[String]>,
    window: VecDeque<RawRow>,
    /// Absolute index of the next row handed out
    position: i64,
    /// Absolute index past the last received row
    received: i64,
    total: Option<i64>,
    row_bytes: usize,
    settings: RowsSettings,
    released: bool,
    closed: bool,
}

fn column_names(columns: &[ColumnInfo]) -> Arc<[String]> {
    columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>().into()
}

fn average_size(rows: &[RawRow]) -> usize {
    if rows.is_empty() {
        return 0;
    }
    rows.iter().map(RawRow::byte_size).sum::<usize>() / rows.len()
}

impl Rows {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        core: Weak<ConnCore>,
        session: Arc<Session>,
        stmt_id: i32,
        origin: Origin,
        owns_stmt: bool,
        info: &ExecInfo,
        segment: ResultSegment,
        known_columns: &[ColumnInfo],
        settings: RowsSettings,
    ) -> Self {
        let columns = segment.columns.unwrap_or_else(|| known_columns.to_vec());
        let received = segment.rows.len() as i64;
        Self {
            core,
            session: Some(session),
            stmt_id,
            origin,
            owns_stmt,
            names: column_names(&columns),
            columns,
            row_bytes: average_size(&segment.rows),
            window: segment.rows.into(),
            position: 0,
            received,
            total: (info.row_count >= 0).then_some(info.row_count),
            settings,
            released: false,
            closed: false,
        }
    }

    /// A result set with every row already at hand
    pub(crate) fn buffered(columns: Vec<ColumnInfo>, rows: Vec<RawRow>, settings: RowsSettings) -> Self {
        let received = rows.len() as i64;
        Self {
            core: Weak::new(),
            session: None,
            stmt_id: 0,
            origin: Origin::Cached,
            owns_stmt: false,
            names: column_names(&columns),
            columns,
            row_bytes: average_size(&rows),
            window: rows.into(),
            position: 0,
            received,
            total: Some(received),
            settings,
            released: true,
            closed: false,
        }
    }

    /// Column descriptors
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column names in order
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Index of the column named `name` (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Total rows reported by the server, when known
    pub fn total_rows(&self) -> Option<i64> {
        self.total
    }

    /// Number of rows handed out so far
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Check if the result set is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check if the rows were served from the result cache
    pub fn is_cached(&self) -> bool {
        self.origin == Origin::Cached
    }

    /// No rows arrived and the server reported none
    pub(crate) fn is_empty_result(&self) -> bool {
        self.position == 0 && self.window.is_empty() && self.total.map_or(true, |t| t <= 0)
    }

    fn exhausted(&self) -> bool {
        self.session.is_none() || self.total.is_some_and(|t| self.received >= t)
    }

    fn capped(&self) -> bool {
        self.settings.max_rows > 0 && self.position >= self.settings.max_rows
    }

    /// Next row, or `None` at the end
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Err(Error::ResultSetClosed);
        }
        if self.capped() {
            return Ok(None);
        }
        if self.window.is_empty() {
            if self.exhausted() {
                return Ok(None);
            }
            self.fetch().await?;
            if self.window.is_empty() {
                self.total = Some(self.received);
                return Ok(None);
            }
        }
        let Some(raw) = self.window.pop_front() else {
            return Ok(None);
        };
        self.position += 1;
        let mut row = self.decode(&raw)?;
        if self.settings.fetch_lobs {
            if let (Some(core), Some(session)) = (self.core.upgrade(), self.session.as_ref()) {
                core.materialize_lobs(session, self.origin, &mut row).await?;
            }
        }
        Ok(Some(row))
    }

    /// Drain the remaining rows
    pub async fn collect(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(self.window.len());
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn decode(&self, raw: &RawRow) -> Result<Row> {
        let values = raw
            .cells
            .iter()
            .zip(&self.columns)
            .map(|(cell, col)| decode_cell(col.col_type, cell.as_deref(), self.settings.decode))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::with_names(values, self.names.clone()).with_rowid(raw.rowid))
    }

    fn prefetch_bytes(&self) -> i32 {
        if self.settings.buf_prefetch > 0 {
            return self.settings.buf_prefetch;
        }
        let wanted = self.row_bytes.saturating_mul(self.settings.fetch_size.max(1) as usize);
        wanted.clamp(limits::PREFETCH_MIN as usize, limits::PREFETCH_MAX as usize) as i32
    }

    async fn fetch(&mut self) -> Result<()> {
        let core = self.core.upgrade().ok_or(Error::ConnectionClosed)?;
        let session = self.session.clone().ok_or(Error::ResultSetClosed)?;
        let mut max_count = self.settings.fetch_size.max(1);
        if self.settings.max_rows > 0 {
            let left = self.settings.max_rows - self.received;
            max_count = max_count.min(left.clamp(1, i32::MAX as i64) as i32);
        }
        let msg = FetchMessage::new(
            self.stmt_id,
            self.received,
            max_count,
            self.prefetch_bytes(),
            self.columns.clone(),
        );
        let reply = core.fetch_window(&session, self.origin, msg).await?;
        tracing::trace!(
            stmt_id = self.stmt_id,
            rows = reply.rows.len(),
            remaining = reply.remaining,
            "fetched window"
        );
        if !reply.rows.is_empty() {
            self.row_bytes = average_size(&reply.rows);
        }
        self.received += reply.rows.len() as i64;
        if reply.remaining >= 0 {
            self.total = Some(self.received + reply.remaining);
        }
        self.window.extend(reply.rows);
        Ok(())
    }

    /// Advance to the statement's next result set
    ///
    /// Returns `false` when there are no more result sets.
    pub async fn next_result_set(&mut self) -> Result<bool> {
        if self.closed {
            return Err(Error::ResultSetClosed);
        }
        let Some(session) = self.session.clone() else {
            return Ok(false);
        };
        let core = self.core.upgrade().ok_or(Error::ConnectionClosed)?;
        let described = core
            .describe_next(&session, self.origin, self.stmt_id, self.settings.read_base_col)
            .await?;
        let Some((info, segment)) = described else {
            return Ok(false);
        };
        if let Some(columns) = segment.columns {
            self.names = column_names(&columns);
            self.columns = columns;
        }
        self.row_bytes = average_size(&segment.rows);
        self.received = segment.rows.len() as i64;
        self.window = segment.rows.into();
        self.position = 0;
        self.total = (info.row_count >= 0).then_some(info.row_count);
        Ok(true)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.owns_stmt {
            if let (Some(core), Some(session)) = (self.core.upgrade(), self.session.as_ref()) {
                core.queue_free(session.id(), self.stmt_id);
            }
        }
    }

    /// Close the result set; a second call is a no-op
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.window.clear();
        if self.released || !self.owns_stmt {
            self.released = true;
            return Ok(());
        }
        self.released = true;
        match (self.core.upgrade(), self.session.as_ref()) {
            (Some(core), Some(session)) => core.free_statement(session, self.stmt_id).await,
            _ => Ok(()),
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.release();
    }
}
