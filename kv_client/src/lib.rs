// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Client surfaces of the transactional store cluster.
//!
//! Three collaborators live behind traits here:
//!
//! - [pd::PdClient]: the placement driver, vending monotonic timestamps and
//!   region routing.
//! - [txn::TxnKv] / [txn::TxnClient]: the KV RPC surface of the store,
//!   a percolator-style two-phase protocol with one primary lock anchoring
//!   all secondaries.
//! - [channel::SqlChannel]: the synchronous SQL side-channel, used only for
//!   table-lock acquisition and region-split hints.
//!
//! [mem] carries in-memory implementations of all three with real percolator
//! lock/write bookkeeping, which is what the engine tests run against.

use common_types::TsoTimestamp;
use common_util::define_result;
use snafu::{Backtrace, Snafu};

pub mod backoff;
pub mod channel;
pub mod mem;
pub mod pd;
pub mod txn;
mod types;

pub use backoff::{Backoff, BATCH_PREWRITE_BACKOFF_MS};
pub use channel::{SqlChannel, SqlChannelRef};
pub use pd::{PdClient, PdClientRef};
pub use txn::{TxnClient, TxnKv};
pub use types::{Mutation, RegionInfo};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Key is locked by another transaction, key:{}, lock_start_ts:{}.\nBacktrace:\n{}",
        key,
        lock_start_ts,
        backtrace
    ))]
    KeyLocked {
        key: String,
        lock_start_ts: TsoTimestamp,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Write conflict, a newer version was committed after the snapshot, key:{}, start_ts:{}, conflict_commit_ts:{}.\nBacktrace:\n{}",
        key,
        start_ts,
        conflict_commit_ts,
        backtrace
    ))]
    WriteConflict {
        key: String,
        start_ts: TsoTimestamp,
        conflict_commit_ts: TsoTimestamp,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Lock not found, it may have been resolved by another reader, key:{}, start_ts:{}.\nBacktrace:\n{}",
        key,
        start_ts,
        backtrace
    ))]
    LockNotFound {
        key: String,
        start_ts: TsoTimestamp,
        backtrace: Backtrace,
    },

    #[snafu(display("Client is closed.\nBacktrace:\n{}", backtrace))]
    ClientClosed { backtrace: Backtrace },

    #[snafu(display("Side channel is closed.\nBacktrace:\n{}", backtrace))]
    ChannelClosed { backtrace: Backtrace },

    #[snafu(display("Operation unsupported by the store, what:{}.\nBacktrace:\n{}", what, backtrace))]
    Unsupported { what: String, backtrace: Backtrace },

    #[snafu(display("Store access failed, msg:{}, err:{}", msg, source))]
    Internal {
        msg: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

define_result!(Error);

/// Render a key for error/log messages.
pub(crate) fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}
