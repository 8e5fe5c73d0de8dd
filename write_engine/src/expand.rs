// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Expansion of rows into the kv pairs the transaction writes.

use common_types::{row::RowWithHandle, schema::TableInfo};
use common_util::define_result;
use kv_client::Mutation;
use snafu::{ResultExt, Snafu};

use crate::kv_encoder::{
    self, encode_index_handle, IndexKeyEncoder, RowKeyEncoder, RowValueEncoder,
    NON_UNIQUE_INDEX_VALUE,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to encode kv pair, err:{}", source))]
    EncodeKv { source: kv_encoder::Error },
}

define_result!(Error);

/// Whether the kv pairs of a row write it or erase it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Put,
    Delete,
}

/// Produce the `1 + num_indices` kv pairs of one row: the row kv plus one kv
/// per index. Delete mode keeps the keys and empties every value, the wire
/// sentinel the store understands as removal.
pub fn expand_row(
    table: &TableInfo,
    row: &RowWithHandle,
    kind: WriteKind,
) -> Result<Vec<Mutation>> {
    let mut kvs = Vec::with_capacity(1 + table.indices.len());

    let row_key = RowKeyEncoder
        .encode_to_vec(table.id, row.handle)
        .context(EncodeKv)?;
    let kv = match kind {
        WriteKind::Put => {
            let value = RowValueEncoder::new(table)
                .encode_to_vec(&row.row)
                .context(EncodeKv)?;
            Mutation::put(row_key, value)
        }
        WriteKind::Delete => Mutation::delete(row_key),
    };
    kvs.push(kv);

    for index in &table.indices {
        let encoder = IndexKeyEncoder::from_schema(table.id, index);
        let key = encoder
            .encode_to_vec(&row.row, row.handle)
            .context(EncodeKv)?;
        let kv = match (kind, index.unique) {
            (WriteKind::Delete, _) => Mutation::delete(key),
            (WriteKind::Put, true) => Mutation::put(key, encode_index_handle(row.handle)),
            (WriteKind::Put, false) => Mutation::put(key, NON_UNIQUE_INDEX_VALUE.to_vec()),
        };
        kvs.push(kv);
    }

    Ok(kvs)
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
            pk_is_handle: false,
            handle_offset: None,
            columns: vec![
                ColumnSchema {
                    id: 1,
                    name: "a".to_string(),
                    offset: 0,
                    kind: DatumKind::Int,
                    nullable: false,
                    auto_increment: false,
                },
                ColumnSchema {
                    id: 2,
                    name: "b".to_string(),
                    offset: 1,
                    kind: DatumKind::Int,
                    nullable: false,
                    auto_increment: false,
                },
            ],
            indices: vec![
                IndexSchema {
                    id: 1,
                    name: "uk".to_string(),
                    unique: true,
                    col_offsets: vec![0],
                },
                IndexSchema {
                    id: 2,
                    name: "ik".to_string(),
                    unique: false,
                    col_offsets: vec![1],
                },
            ],
            partitioned: false,
            has_generated_columns: false,
        }
    }

    fn test_row() -> RowWithHandle {
        RowWithHandle::new(Row::from_datums(vec![Datum::Int(1), Datum::Int(2)]), 77)
    }

    #[test]
    fn test_expand_put() {
        let table = test_table();
        let kvs = expand_row(&table, &test_row(), WriteKind::Put).unwrap();
        assert_eq!(1 + table.indices.len(), kvs.len());
        assert!(kvs.iter().all(|kv| !kv.is_delete()));

        // Unique index stores the handle, non-unique the marker byte.
        assert_eq!(encode_index_handle(77), kvs[1].value);
        assert_eq!(NON_UNIQUE_INDEX_VALUE, kvs[2].value.as_slice());
    }

    #[test]
    fn test_expand_delete_empties_values() {
        let table = test_table();
        let puts = expand_row(&table, &test_row(), WriteKind::Put).unwrap();
        let deletes = expand_row(&table, &test_row(), WriteKind::Delete).unwrap();

        assert_eq!(puts.len(), deletes.len());
        for (put, delete) in puts.iter().zip(deletes.iter()) {
            assert_eq!(put.key, delete.key);
            assert!(delete.is_delete());
        }
    }
}
