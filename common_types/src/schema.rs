// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Table descriptors read from the catalog.
//!
//! A descriptor is immutable for the duration of one write; schema changes
//! are detected by comparing `update_timestamp` of two reads.

use snafu::{ensure, Backtrace, Snafu};

use common_util::define_result;

use crate::{datum::DatumKind, table::TableId};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Column offsets are not contiguous, table:{}, offset:{}, expect:{}.\nBacktrace:\n{}",
        table,
        offset,
        expect,
        backtrace
    ))]
    InvalidColumnOffset {
        table: String,
        offset: usize,
        expect: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Handle column is missing or not an int column, table:{}.\nBacktrace:\n{}",
        table,
        backtrace
    ))]
    InvalidHandleColumn { table: String, backtrace: Backtrace },

    #[snafu(display(
        "Index refers to an unknown column offset, table:{}, index_id:{}, offset:{}.\nBacktrace:\n{}",
        table,
        index_id,
        offset,
        backtrace
    ))]
    InvalidIndexColumn {
        table: String,
        index_id: i64,
        offset: usize,
        backtrace: Backtrace,
    },
}

define_result!(Error);

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column id assigned by the catalog, stable across reorders.
    pub id: i64,
    pub name: String,
    /// Position of the column in the table, also the position of its datum in
    /// the internal row.
    pub offset: usize,
    pub kind: DatumKind,
    pub nullable: bool,
    pub auto_increment: bool,
}

/// One index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub id: i64,
    pub name: String,
    pub unique: bool,
    /// Offsets of the indexed columns, in index column order.
    pub col_offsets: Vec<usize>,
}

/// Descriptor of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub id: TableId,
    pub db_id: i64,
    pub name: String,
    /// Bumped by the catalog on every schema change.
    pub update_timestamp: i64,
    /// Whether the primary key column doubles as the row handle.
    pub pk_is_handle: bool,
    /// Offset of the handle column, set iff `pk_is_handle`.
    pub handle_offset: Option<usize>,
    pub columns: Vec<ColumnSchema>,
    pub indices: Vec<IndexSchema>,
    pub partitioned: bool,
    pub has_generated_columns: bool,
}

impl TableInfo {
    /// Validate internal consistency of a descriptor built by hand or decoded
    /// from the catalog.
    pub fn validate(&self) -> Result<()> {
        for (expect, column) in self.columns.iter().enumerate() {
            ensure!(
                column.offset == expect,
                InvalidColumnOffset {
                    table: &self.name,
                    offset: column.offset,
                    expect,
                }
            );
        }

        if self.pk_is_handle {
            let valid = self
                .handle_offset
                .and_then(|offset| self.columns.get(offset))
                .map(|c| matches!(c.kind, DatumKind::Int | DatumKind::UInt))
                .unwrap_or(false);
            ensure!(valid, InvalidHandleColumn { table: &self.name });
        }

        for index in &self.indices {
            for offset in &index.col_offsets {
                ensure!(
                    *offset < self.columns.len(),
                    InvalidIndexColumn {
                        table: &self.name,
                        index_id: index.id,
                        offset: *offset,
                    }
                );
            }
        }

        Ok(())
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Find a column by name, matching case-insensitively.
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The auto-increment column of this table, if any.
    pub fn auto_increment_column(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    pub fn unique_indices(&self) -> impl Iterator<Item = &IndexSchema> {
        self.indices.iter().filter(|i| i.unique)
    }
}
