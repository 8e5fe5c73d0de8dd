// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Client to access the catalog/meta service.
//!
//! The meta service owns table descriptors and the per-table id allocator.
//! Only the client surface lives here; the in-memory implementation under
//! [mem] is what tests run against.

use std::sync::Arc;

use async_trait::async_trait;
use common_types::{
    schema::TableInfo,
    table::TableId,
};
use common_util::define_result;
use snafu::{Backtrace, Snafu};

pub mod allocator;
pub mod mem;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Table not found, database:{}, table:{}.\nBacktrace:\n{}",
        database,
        table,
        backtrace
    ))]
    TableNotFound {
        database: String,
        table: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Id allocator is busy, another writer holds the allocation lock, table_id:{}.\nBacktrace:\n{}",
        table_id,
        backtrace
    ))]
    AllocatorBusy {
        table_id: TableId,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Id range exhausted, table_id:{}, step:{}.\nBacktrace:\n{}",
        table_id,
        step,
        backtrace
    ))]
    IdExhausted {
        table_id: TableId,
        step: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to access meta service, msg:{}, err:{}", msg, source))]
    Internal {
        msg: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

define_result!(Error);

/// Access to the catalog/meta service.
#[async_trait]
pub trait MetaClient: Send + Sync {
    /// Fetch the descriptor of `table` in `database`.
    async fn table_info(&self, database: &str, table: &str) -> Result<TableInfo>;

    /// Reserve a contiguous id range `[base, base + step)` that no other
    /// writer will be given, and return `base`.
    ///
    /// The service serializes allocations through a distributed lock; callers
    /// should expect [Error::AllocatorBusy] under contention and retry, see
    /// [allocator::IdAllocator].
    async fn alloc_auto_id(
        &self,
        db_id: i64,
        table_id: TableId,
        step: u64,
        unsigned: bool,
    ) -> Result<i64>;
}

pub type MetaClientRef = Arc<dyn MetaClient>;
