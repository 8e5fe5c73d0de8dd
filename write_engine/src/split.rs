// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Region pre-split hints.
//!
//! Fire-and-forget requests over the side-channel to spread the incoming
//! write across more regions up front. Rejections never fail a write
//! (except in test mode): the hints only exist to improve parallelism.

use common_types::{
    row::RowWithHandle,
    schema::TableInfo,
    table::{Handle, TableIdent},
};
use common_util::define_result;
use kv_client::SqlChannelRef;
use log::warn;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::options::WriteOptions;

/// Region size the estimate aims at when no split count is given.
const SPLIT_SIZE_MB: u64 = 96;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to request region split, err:{}", source))]
    SplitRequest { source: kv_client::Error },

    #[snafu(display("No side channel configured for region split.\nBacktrace:\n{}", backtrace))]
    MissingChannel { backtrace: Backtrace },
}

define_result!(Error);

/// Send the table and index pre-split hints for this write.
pub async fn pre_split(
    channel: Option<&SqlChannelRef>,
    target: &TableIdent,
    table: &TableInfo,
    rows: &[RowWithHandle],
    total_bytes: u64,
    options: &WriteOptions,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let channel = match channel {
        Some(channel) => channel,
        None if options.is_test => return MissingChannel.fail(),
        None => {
            warn!("Region split requested but no side channel is configured");
            return Ok(());
        }
    };

    if let Err(e) = split_table(channel, target, rows, total_bytes, options).await {
        if options.is_test {
            return Err(e);
        }
        warn!("Table region split rejected, table:{}, err:{}", target, e);
    }

    // Index splits only run with an explicit split count.
    if options.region_split_num > 1 {
        for index in &table.indices {
            if let Err(e) =
                split_index(channel, target, index_values(table, index, rows), &index.name, options)
                    .await
            {
                if options.is_test {
                    return Err(e);
                }
                warn!(
                    "Index region split rejected, table:{}, index:{}, err:{}",
                    target, index.name, e
                );
            }
        }
    }

    Ok(())
}

async fn split_table(
    channel: &SqlChannelRef,
    target: &TableIdent,
    rows: &[RowWithHandle],
    total_bytes: u64,
    options: &WriteOptions,
) -> Result<()> {
    let split_num = if options.region_split_num > 0 {
        options.region_split_num
    } else {
        let split_bytes = SPLIT_SIZE_MB * 1024 * 1024;
        (total_bytes + split_bytes - 1) / split_bytes
    };
    if split_num < 2 {
        return Ok(());
    }

    let min_handle = rows.iter().map(|r| r.handle).min().unwrap_or(0);
    let max_handle = rows.iter().map(|r| r.handle).max().unwrap_or(0);

    // Only a handle range wide enough to matter is worth naming in the hint;
    // the span factor is empirical.
    let span = options.split_handle_span.saturating_mul(split_num as i64);
    let (lower, upper): (Handle, Handle) =
        if max_handle.saturating_sub(min_handle) > span {
            (min_handle, max_handle)
        } else {
            (0, i32::MAX as Handle)
        };

    channel
        .split_table_region(target, lower, upper, split_num)
        .await
        .context(SplitRequest)
}

async fn split_index(
    channel: &SqlChannelRef,
    target: &TableIdent,
    mut values: Vec<String>,
    index_name: &str,
    options: &WriteOptions,
) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    values.sort();
    let lower = values.first().cloned().unwrap_or_default();
    let upper = values.last().cloned().unwrap_or_default();

    channel
        .split_index_region(target, index_name, &lower, &upper, options.region_split_num)
        .await
        .context(SplitRequest)
}

/// String representation of the first indexed column of every row.
fn index_values(
    table: &TableInfo,
    index: &common_types::schema::IndexSchema,
    rows: &[RowWithHandle],
) -> Vec<String> {
    let offset = match index.col_offsets.first() {
        Some(offset) if *offset < table.num_columns() => *offset,
        _ => return Vec::new(),
    };
    rows.iter()
        .map(|r| r.row.column(offset).to_string())
        .collect()
}
