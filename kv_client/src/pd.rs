// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Placement driver client.

use std::sync::Arc;

use async_trait::async_trait;
use common_types::{table::TableId, TsoTimestamp};

use crate::{types::RegionInfo, Result};

/// Client to the placement driver.
#[async_trait]
pub trait PdClient: Send + Sync {
    /// Acquire one monotonic timestamp from the timestamp oracle.
    async fn alloc_timestamp(&self) -> Result<TsoTimestamp>;

    /// Regions covering the table's key range, sorted by end key.
    async fn table_regions(&self, table_id: TableId) -> Result<Vec<RegionInfo>>;
}

pub type PdClientRef = Arc<dyn PdClient>;
