// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Write options.

use std::collections::HashMap;

use common_util::define_result;
use serde_derive::Deserialize;
use snafu::{Backtrace, ResultExt, Snafu};

pub const ENABLE: &str = "enable";
pub const REPLACE: &str = "replace";
pub const USE_TABLE_LOCK: &str = "useTableLock";
pub const ALLOW_NO_TABLE_LOCK: &str = "allowNoTableLock";
pub const ENABLE_REGION_SPLIT: &str = "enableRegionSplit";
pub const REGION_SPLIT_NUM: &str = "regionSplitNum";
pub const SPLIT_HANDLE_SPAN: &str = "splitHandleSpan";
pub const WRITE_CONCURRENCY: &str = "writeConcurrency";
pub const SNAPSHOT_BATCH_GET_SIZE: &str = "snapshotBatchGetSize";
pub const SKIP_COMMIT_SECONDARY_KEY: &str = "skipCommitSecondaryKey";
pub const IS_TTL_UPDATE: &str = "isTTLUpdate";
pub const LOCK_TTL_SECONDS: &str = "lockTTLSeconds";
pub const SLEEP_AFTER_PREWRITE_PRIMARY_KEY: &str = "sleepAfterPrewritePrimaryKey";
pub const SLEEP_AFTER_PREWRITE_SECONDARY_KEY: &str = "sleepAfterPrewriteSecondaryKey";
pub const SLEEP_AFTER_GET_COMMIT_TS: &str = "sleepAfterGetCommitTS";
pub const IS_TEST: &str = "isTest";
pub const URL: &str = "url";

/// Default batch size of one snapshot batch-get request.
const DEFAULT_SNAPSHOT_BATCH_GET_SIZE: usize = 2048;
/// Default initial ttl of the transaction locks (1h).
const DEFAULT_LOCK_TTL_SECONDS: u64 = 3600;
/// Default handle span factor of the table pre-split heuristic.
const DEFAULT_SPLIT_HANDLE_SPAN: i64 = 1000;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Failed to parse bool option, key:{}, err:{}.\nBacktrace:\n{}",
        key,
        source,
        backtrace
    ))]
    ParseBool {
        key: String,
        source: std::str::ParseBoolError,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Failed to parse int option, key:{}, err:{}.\nBacktrace:\n{}",
        key,
        source,
        backtrace
    ))]
    ParseInt {
        key: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
}

define_result!(Error);

/// Options of one batch write.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Kill-switch: a write with `enable == false` is rejected up front.
    pub enable: bool,
    /// Overwrite on conflict instead of failing.
    pub replace: bool,
    /// Take the table write-lock over the side-channel before encoding.
    pub use_table_lock: bool,
    /// Escape hatch: proceed without the lock when the server lacks
    /// table-lock support.
    pub allow_no_table_lock: bool,
    /// Emit region pre-split hints.
    pub enable_region_split: bool,
    /// Explicit split count, 0 means estimate from data size.
    pub region_split_num: u64,
    /// Handle span factor of the table split heuristic.
    pub split_handle_span: i64,
    /// Partition cap of the secondary phases, <= 0 means one partition per
    /// region.
    pub write_concurrency: i64,
    /// Batch size of snapshot reads during conflict resolution.
    pub snapshot_batch_get_size: usize,
    /// Skip the secondary-commit phase entirely.
    pub skip_commit_secondary_key: bool,
    /// Keep the primary lock alive with a background heartbeat.
    pub is_ttl_update: bool,
    /// Initial per-lock ttl.
    pub lock_ttl_seconds: u64,
    /// Test-only pauses, in milliseconds.
    pub sleep_after_prewrite_primary_key_ms: u64,
    pub sleep_after_prewrite_secondary_key_ms: u64,
    pub sleep_after_get_commit_ts_ms: u64,
    /// Propagate side-channel errors instead of swallowing them.
    pub is_test: bool,
    /// Side-channel endpoint.
    pub url: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            enable: true,
            replace: false,
            use_table_lock: false,
            allow_no_table_lock: false,
            enable_region_split: false,
            region_split_num: 0,
            split_handle_span: DEFAULT_SPLIT_HANDLE_SPAN,
            write_concurrency: 0,
            snapshot_batch_get_size: DEFAULT_SNAPSHOT_BATCH_GET_SIZE,
            skip_commit_secondary_key: false,
            is_ttl_update: false,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            sleep_after_prewrite_primary_key_ms: 0,
            sleep_after_prewrite_secondary_key_ms: 0,
            sleep_after_get_commit_ts_ms: 0,
            is_test: false,
            url: String::new(),
        }
    }
}

impl WriteOptions {
    /// Build options from a string map, unrecognized keys are ignored.
    pub fn parse_from(map: &HashMap<String, String>) -> Result<WriteOptions> {
        let mut options = WriteOptions::default();
        for (key, value) in map {
            match key.as_str() {
                ENABLE => options.enable = parse_bool(key, value)?,
                REPLACE => options.replace = parse_bool(key, value)?,
                USE_TABLE_LOCK => options.use_table_lock = parse_bool(key, value)?,
                ALLOW_NO_TABLE_LOCK => options.allow_no_table_lock = parse_bool(key, value)?,
                ENABLE_REGION_SPLIT => options.enable_region_split = parse_bool(key, value)?,
                REGION_SPLIT_NUM => {
                    options.region_split_num = value.parse().context(ParseInt { key })?
                }
                SPLIT_HANDLE_SPAN => {
                    options.split_handle_span = value.parse().context(ParseInt { key })?
                }
                WRITE_CONCURRENCY => {
                    options.write_concurrency = value.parse().context(ParseInt { key })?
                }
                SNAPSHOT_BATCH_GET_SIZE => {
                    options.snapshot_batch_get_size = value.parse().context(ParseInt { key })?
                }
                SKIP_COMMIT_SECONDARY_KEY => {
                    options.skip_commit_secondary_key = parse_bool(key, value)?
                }
                IS_TTL_UPDATE => options.is_ttl_update = parse_bool(key, value)?,
                LOCK_TTL_SECONDS => {
                    options.lock_ttl_seconds = value.parse().context(ParseInt { key })?
                }
                SLEEP_AFTER_PREWRITE_PRIMARY_KEY => {
                    options.sleep_after_prewrite_primary_key_ms =
                        value.parse().context(ParseInt { key })?
                }
                SLEEP_AFTER_PREWRITE_SECONDARY_KEY => {
                    options.sleep_after_prewrite_secondary_key_ms =
                        value.parse().context(ParseInt { key })?
                }
                SLEEP_AFTER_GET_COMMIT_TS => {
                    options.sleep_after_get_commit_ts_ms =
                        value.parse().context(ParseInt { key })?
                }
                IS_TEST => options.is_test = parse_bool(key, value)?,
                URL => options.url = value.clone(),
                _ => {}
            }
        }

        Ok(options)
    }

    #[inline]
    pub fn lock_ttl_ms(&self) -> u64 {
        self.lock_ttl_seconds * 1000
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value.parse().context(ParseBool { key })
}
