// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Synchronous SQL side-channel.
//!
//! Used only for optional table-lock acquisition and region-split hints; the
//! data path never goes through it.

use std::sync::Arc;

use async_trait::async_trait;
use common_types::table::{Handle, TableIdent};

use crate::Result;

#[async_trait]
pub trait SqlChannel: Send + Sync {
    /// Whether the server advertises table-lock support.
    async fn supports_table_lock(&self) -> Result<bool>;

    /// The server-side delay before a stale table lock is cleaned.
    async fn delay_clean_table_lock_ms(&self) -> Result<u64>;

    /// `LOCK TABLES t WRITE LOCAL`.
    async fn lock_table_write(&self, table: &TableIdent) -> Result<()>;

    async fn unlock_tables(&self) -> Result<()>;

    /// Hint the store to pre-split the table's record range.
    async fn split_table_region(
        &self,
        table: &TableIdent,
        lower: Handle,
        upper: Handle,
        region_num: u64,
    ) -> Result<()>;

    /// Hint the store to pre-split one index's range.
    async fn split_index_region(
        &self,
        table: &TableIdent,
        index_name: &str,
        lower: &str,
        upper: &str,
        region_num: u64,
    ) -> Result<()>;

    /// Whether the underlying connection has been closed.
    fn is_closed(&self) -> bool;
}

pub type SqlChannelRef = Arc<dyn SqlChannel>;
