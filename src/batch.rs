//! Batch execution support
//!
//! A batch runs one statement once per row of values. When every row binds
//! inline and the bound descriptors agree with the server's, all rows travel in
//! a single batch request; otherwise rows execute one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(conn: &dm_rs::Connection) -> dm_rs::Result<()> {
//! use dm_rs::{BatchBuilder, Value};
//!
//! let batch = BatchBuilder::new("INSERT INTO users (id, name) VALUES (?, ?)")
//!     .add_row(vec![Value::Integer(1), Value::from("Alice")])
//!     .add_row(vec![Value::Integer(2), Value::from("Bob")])
//!     .build();
//!
//! let result = conn.execute_batch(&batch).await?;
//! println!("update counts: {:?}", result.update_counts);
//! # Ok(())
//! # }
//! ```

use crate::config::{BatchType, Config};
use crate::error::{Error, Result, RowError};
use crate::messages::ParamInfo;
use crate::row::Value;
use crate::statement::{BoundRow, StatementType};

/// Update count recorded for a row that failed
pub const EXECUTE_FAILED: i64 = -3;

/// A collection of bind values for batch execution
#[derive(Debug, Clone, Default)]
pub struct BatchBinds {
    pub(crate) sql: String,
    pub(crate) rows: Vec<Vec<Value>>,
    num_columns: usize,
}

impl BatchBinds {
    /// Create a new batch with the given SQL statement
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            rows: Vec::new(),
            num_columns: 0,
        }
    }

    /// Add a row of bind values
    pub fn add_row(&mut self, values: Vec<Value>) -> &mut Self {
        if self.rows.is_empty() {
            self.num_columns = values.len();
        }
        self.rows.push(values);
        self
    }

    /// Get the number of rows (executions)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Get the number of bind columns per row
    pub fn column_count(&self) -> usize {
        self.num_columns
    }

    /// Get the SQL statement
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validate that all rows have the same number of columns
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::Internal("batch has no rows".to_string()));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.num_columns {
                let err = Error::UnboundedParameter(row.len().min(self.num_columns) + 1);
                return Err(err.add_detail(format!(" (row {i})")));
            }
        }
        Ok(())
    }
}

/// Builder for creating batch execution requests
#[derive(Debug, Default)]
pub struct BatchBuilder {
    batch: BatchBinds,
}

impl BatchBuilder {
    /// Create a new batch builder with the given SQL statement
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            batch: BatchBinds::new(sql),
        }
    }

    /// Add a row of bind values
    pub fn add_row(mut self, values: Vec<Value>) -> Self {
        self.batch.add_row(values);
        self
    }

    /// Add multiple rows at once
    pub fn add_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        for row in rows {
            self.batch.add_row(row);
        }
        self
    }

    /// Build the batch
    pub fn build(self) -> BatchBinds {
        self.batch
    }
}

/// Result of batch execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Update count per row, [`EXECUTE_FAILED`] for failed rows
    pub update_counts: Vec<i64>,
    /// Total rows affected
    pub rows_affected: u64,
}

impl BatchResult {
    /// Build from per-row counts
    pub fn from_counts(update_counts: Vec<i64>) -> Self {
        let rows_affected = update_counts.iter().filter(|c| **c > 0).map(|c| *c as u64).sum();
        Self {
            update_counts,
            rows_affected,
        }
    }

    /// Check the per-row outcome and fold failures into one error
    pub(crate) fn finish(update_counts: Vec<i64>, errors: Vec<RowError>) -> Result<Self> {
        if errors.is_empty() {
            Ok(Self::from_counts(update_counts))
        } else {
            Err(Error::BpWithError {
                update_counts,
                details: errors,
            })
        }
    }
}

/// How a batch will travel
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BatchPlan {
    /// One batch request carrying these descriptors
    Bulk(Vec<ParamInfo>),
    /// One execute per row
    PerRow,
}

/// Choose between a bulk request and per-row execution
pub(crate) fn plan(rows: &[BoundRow], server: &[ParamInfo], config: &Config, stmt_type: StatementType) -> BatchPlan {
    if rows.len() < 2
        || config.batch_type == BatchType::Single
        || (config.batch_not_on_call && stmt_type == StatementType::Call)
        || rows.iter().any(|r| r.needs_off_row() || r.has_output() || !r.cursors.is_empty())
    {
        return BatchPlan::PerRow;
    }
    merge_params(rows, server).map_or(BatchPlan::PerRow, BatchPlan::Bulk)
}

/// Merge per-row descriptors; `None` when a row's types diverge from the
/// server's. Precision widens to the largest bound value, and a merged set
/// that differs from the server's is sent with the batch.
pub(crate) fn merge_params(rows: &[BoundRow], server: &[ParamInfo]) -> Option<Vec<ParamInfo>> {
    let mut merged = server.to_vec();
    for row in rows {
        for (i, (param, cell)) in row.params.iter().zip(&row.cells).enumerate() {
            if cell.is_none() {
                continue;
            }
            let slot = merged.get_mut(i)?;
            if param.col_type != slot.col_type {
                return None;
            }
            slot.prec = slot.prec.max(param.prec);
        }
    }
    Some(merged)
}
