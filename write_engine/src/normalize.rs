// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Projection of source rows onto the table's column layout.

use common_types::{
    datum::{Datum, DatumKind},
    row::Row,
    schema::{ColumnSchema, TableInfo},
};
use common_util::define_result;
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::source::SourceRow;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Column count mismatch, table:{}, expect:{}, given:{}.\nBacktrace:\n{}",
        table,
        expect,
        given,
        backtrace
    ))]
    ColumnCountMismatch {
        table: String,
        expect: usize,
        given: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Source field matches no column, table:{}, field:{}.\nBacktrace:\n{}",
        table,
        field,
        backtrace
    ))]
    UnknownField {
        table: String,
        field: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Source field appears twice, table:{}, field:{}.\nBacktrace:\n{}",
        table,
        field,
        backtrace
    ))]
    DuplicateField {
        table: String,
        field: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Null value in non-null column, column:{}.\nBacktrace:\n{}",
        column,
        backtrace
    ))]
    NullValue { column: String, backtrace: Backtrace },

    #[snafu(display(
        "Null value in auto-increment column, column:{}.\nBacktrace:\n{}",
        column,
        backtrace
    ))]
    NullAutoIncrement { column: String, backtrace: Backtrace },

    #[snafu(display("Failed to convert value of column:{}, err:{}", column, source))]
    ConvertValue {
        column: String,
        source: common_types::datum::Error,
    },
}

define_result!(Error);

/// Projects source rows to internal rows aligned to table column order.
///
/// Built once per write from the source field names; [normalize] is then
/// applied per row on the worker partitions.
///
/// [normalize]: RowNormalizer::normalize
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    table: TableInfo,
    /// Column offset of every source field position.
    target_offsets: Vec<usize>,
    /// Offset of the auto-increment column when the source omits it.
    fill_auto_inc: Option<usize>,
}

impl RowNormalizer {
    pub fn try_new(table: &TableInfo, field_names: &[String]) -> Result<RowNormalizer> {
        let auto_inc = table.auto_increment_column();
        let auto_inc_provided = auto_inc
            .map(|c| field_names.iter().any(|f| f.eq_ignore_ascii_case(&c.name)))
            .unwrap_or(false);

        let expect = if auto_inc.is_some() && !auto_inc_provided {
            table.num_columns() - 1
        } else {
            table.num_columns()
        };
        ensure!(
            field_names.len() == expect,
            ColumnCountMismatch {
                table: &table.name,
                expect,
                given: field_names.len(),
            }
        );

        let mut target_offsets = Vec::with_capacity(field_names.len());
        for field in field_names {
            let column = table.column_by_name(field).context(UnknownField {
                table: &table.name,
                field,
            })?;
            ensure!(
                !target_offsets.contains(&column.offset),
                DuplicateField {
                    table: &table.name,
                    field,
                }
            );
            target_offsets.push(column.offset);
        }

        let fill_auto_inc = if auto_inc_provided {
            None
        } else {
            auto_inc.map(|c| c.offset)
        };

        Ok(RowNormalizer {
            table: table.clone(),
            target_offsets,
            fill_auto_inc,
        })
    }

    /// Whether the write has to allocate ids for the auto-increment column.
    #[inline]
    pub fn fills_auto_increment(&self) -> bool {
        self.fill_auto_inc.is_some()
    }

    /// Normalize one source row; `auto_id` is the allocated id of this row
    /// when the auto-increment column is being filled.
    pub fn normalize(&self, source_row: SourceRow, auto_id: Option<i64>) -> Result<Row> {
        ensure!(
            source_row.len() == self.target_offsets.len(),
            ColumnCountMismatch {
                table: &self.table.name,
                expect: self.target_offsets.len(),
                given: source_row.len(),
            }
        );

        let mut row = Row::new_null(self.table.num_columns());
        for (datum, offset) in source_row.into_iter().zip(self.target_offsets.iter()) {
            let column = &self.table.columns[*offset];
            self.check_null(column, &datum)?;
            let datum = datum.convert_to(column.kind).context(ConvertValue {
                column: &column.name,
            })?;
            row.set_column(*offset, datum);
        }

        if let Some(offset) = self.fill_auto_inc {
            let column = &self.table.columns[offset];
            // The caller allocates one id per row, in input order.
            let id = auto_id.expect("auto id must be allocated for this table");
            let datum = if column.kind == DatumKind::UInt {
                Datum::UInt(id as u64)
            } else {
                Datum::Int(id)
            };
            row.set_column(offset, datum);
        }

        Ok(row)
    }

    fn check_null(&self, column: &ColumnSchema, datum: &Datum) -> Result<()> {
        if !datum.is_null() {
            return Ok(());
        }
        ensure!(
            !column.auto_increment,
            NullAutoIncrement {
                column: &column.name,
            }
        );
        ensure!(
            column.nullable,
            NullValue {
                column: &column.name,
            }
        );
        Ok(())
    }
}
