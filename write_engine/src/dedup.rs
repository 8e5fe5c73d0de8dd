// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Deduplication of the input against itself.
//!
//! The store would reject a transaction writing one key twice, so rows that
//! collide inside the input collapse before any kv is produced: first by row
//! key (pk-is-handle tables), then by every unique index key. The first
//! occurrence in input order is the representative, which keeps reruns of the
//! pipeline deterministic.

use std::collections::HashSet;

use common_types::{row::RowWithHandle, schema::TableInfo};
use common_util::define_result;
use snafu::{ResultExt, Snafu};

use crate::kv_encoder::{self, IndexKeyEncoder, RowKeyEncoder};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build dedup key, err:{}", source))]
    BuildKey { source: kv_encoder::Error },
}

define_result!(Error);

/// Collapse duplicate row keys and unique-index keys, keeping the first
/// occurrence of each.
pub fn dedup_rows(table: &TableInfo, rows: Vec<RowWithHandle>) -> Result<Vec<RowWithHandle>> {
    let mut rows = if table.pk_is_handle {
        dedup_by_row_key(table, rows)?
    } else {
        rows
    };

    for index in table.unique_indices() {
        let encoder = IndexKeyEncoder::from_schema(table.id, index);
        let mut seen = HashSet::with_capacity(rows.len());
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let key = encoder
                .encode_to_vec(&row.row, row.handle)
                .context(BuildKey)?;
            if seen.insert(key) {
                kept.push(row);
            }
        }
        rows = kept;
    }

    Ok(rows)
}

fn dedup_by_row_key(table: &TableInfo, rows: Vec<RowWithHandle>) -> Result<Vec<RowWithHandle>> {
    let encoder = RowKeyEncoder;
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let key = encoder.encode_to_vec(table.id, row.handle).context(BuildKey)?;
        if seen.insert(key) {
            kept.push(row);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use common_types::{
        datum::{Datum, DatumKind},
        row::Row,
        schema::{ColumnSchema, IndexSchema},
    };

    use super::*;

    fn test_table() -> TableInfo {
        TableInfo {
            id: 4,
            db_id: 1,
            name: "t".to_string(),
            update_timestamp: 0,
            pk_is_handle: true,
            handle_offset: Some(0),
            columns: vec![
                ColumnSchema {
                    id: 1,
                    name: "id".to_string(),
                    offset: 0,
                    kind: DatumKind::Int,
                    nullable: false,
                    auto_increment: false,
                },
                ColumnSchema {
                    id: 2,
                    name: "uk".to_string(),
                    offset: 1,
                    kind: DatumKind::Int,
                    nullable: false,
                    auto_increment: false,
                },
            ],
            indices: vec![IndexSchema {
                id: 1,
                name: "uk".to_string(),
                unique: true,
                col_offsets: vec![1],
            }],
            partitioned: false,
            has_generated_columns: false,
        }
    }

    fn row(id: i64, uk: i64) -> RowWithHandle {
        RowWithHandle::new(Row::from_datums(vec![Datum::Int(id), Datum::Int(uk)]), id)
    }

    #[test]
    fn test_dedup_by_handle_keeps_first() {
        let table = test_table();
        let rows = vec![row(1, 10), row(1, 11), row(2, 12)];
        let kept = dedup_rows(&table, rows).unwrap();
        assert_eq!(2, kept.len());
        // Representative of handle 1 is its first occurrence.
        assert_eq!(&Datum::Int(10), kept[0].row.column(1));
        assert_eq!(2, kept[1].handle);
    }

    #[test]
    fn test_dedup_by_unique_index() {
        let table = test_table();
        let rows = vec![row(1, 10), row(2, 10), row(3, 11)];
        let kept = dedup_rows(&table, rows).unwrap();
        assert_eq!(2, kept.len());
        assert_eq!(1, kept[0].handle);
        assert_eq!(3, kept[1].handle);
    }

    #[test]
    fn test_dedup_no_collisions_is_identity() {
        let table = test_table();
        let rows = vec![row(1, 10), row(2, 11), row(3, 12)];
        let kept = dedup_rows(&table, rows.clone()).unwrap();
        assert_eq!(rows, kept);
    }
}
