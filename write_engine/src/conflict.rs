// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Conflict resolution against the store snapshot.
//!
//! Finds every stored row colliding with the input, by handle or by any
//! unique-index value, so the caller can rewrite them in the same
//! transaction. All reads happen at the transaction's `start_ts`.

use std::collections::HashMap;

use common_types::{
    row::RowWithHandle,
    schema::TableInfo,
    table::Handle,
    TsoTimestamp,
};
use common_util::define_result;
use kv_client::TxnClient;
use snafu::{ResultExt, Snafu};

use crate::kv_encoder::{
    self, decode_index_handle, IndexKeyEncoder, RowKeyEncoder, RowValueDecoder,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read snapshot, err:{}", source))]
    SnapshotRead { source: kv_client::Error },

    #[snafu(display("Failed to build probe key, err:{}", source))]
    BuildKey { source: kv_encoder::Error },

    #[snafu(display("Failed to decode stored row, err:{}", source))]
    DecodeRow { source: kv_encoder::Error },

    #[snafu(display("Failed to decode stored index entry, err:{}", source))]
    DecodeIndex { source: kv_encoder::Error },
}

define_result!(Error);

/// Resolve conflicts of one worker partition of input rows.
///
/// Returns the stored rows that collide with the input. Three probe passes,
/// all batched by `batch_size`:
///
/// 1. row keys of the input handles,
/// 2. unique-index keys of the input rows, yielding old handles only (a
///    unique-index entry stores nothing but the handle),
/// 3. row keys of those old handles, to materialize the full old rows.
///
/// Pass 3 cannot fold into pass 2: decoding a row out of an index entry
/// would leak row decoding into index decoding, which the store's codec
/// forbids.
pub async fn resolve_partition<C: TxnClient>(
    client: &mut C,
    table: &TableInfo,
    start_ts: TsoTimestamp,
    rows: &[RowWithHandle],
    batch_size: usize,
) -> Result<Vec<RowWithHandle>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let decoder = RowValueDecoder::new(table);
    let mut old_rows: HashMap<Handle, RowWithHandle> = HashMap::new();

    // Pass 1: probe by handle.
    let mut row_keys = Vec::with_capacity(rows.len());
    for row in rows {
        let key = RowKeyEncoder
            .encode_to_vec(table.id, row.handle)
            .context(BuildKey)?;
        row_keys.push((key, row.handle));
    }
    let hits = batch_get(
        client,
        start_ts,
        row_keys.iter().map(|(k, _)| k.clone()).collect(),
        batch_size,
    )
    .await?;
    for (key, handle) in &row_keys {
        if let Some(value) = hits.get(key) {
            let row = decoder.decode(value, *handle).context(DecodeRow)?;
            old_rows.insert(*handle, RowWithHandle::new(row, *handle));
        }
    }

    // Pass 2: probe by unique-index value.
    let mut conflict_handles = Vec::new();
    for index in table.unique_indices() {
        let encoder = IndexKeyEncoder::from_schema(table.id, index);
        let mut index_keys = Vec::with_capacity(rows.len());
        for row in rows {
            index_keys.push(encoder.encode_to_vec(&row.row, row.handle).context(BuildKey)?);
        }
        let hits = batch_get(client, start_ts, index_keys, batch_size).await?;
        for value in hits.values() {
            let handle = decode_index_handle(value).context(DecodeIndex)?;
            if !old_rows.contains_key(&handle) {
                conflict_handles.push(handle);
            }
        }
    }

    // Pass 3: materialize the rows behind the conflicting handles.
    conflict_handles.sort_unstable();
    conflict_handles.dedup();
    let mut handle_keys = Vec::with_capacity(conflict_handles.len());
    for handle in &conflict_handles {
        handle_keys.push((
            RowKeyEncoder
                .encode_to_vec(table.id, *handle)
                .context(BuildKey)?,
            *handle,
        ));
    }
    let hits = batch_get(
        client,
        start_ts,
        handle_keys.iter().map(|(k, _)| k.clone()).collect(),
        batch_size,
    )
    .await?;
    for (key, handle) in &handle_keys {
        if let Some(value) = hits.get(key) {
            let row = decoder.decode(value, *handle).context(DecodeRow)?;
            old_rows.insert(*handle, RowWithHandle::new(row, *handle));
        }
    }

    Ok(old_rows.into_values().collect())
}

async fn batch_get<C: TxnClient>(
    client: &mut C,
    ts: TsoTimestamp,
    keys: Vec<Vec<u8>>,
    batch_size: usize,
) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
    let mut result = HashMap::new();
    for chunk in keys.chunks(batch_size.max(1)) {
        let hits = client
            .snapshot_batch_get(ts, chunk.to_vec())
            .await
            .context(SnapshotRead)?;
        result.extend(hits);
    }
    Ok(result)
}
