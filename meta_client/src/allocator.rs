// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Contiguous id range allocation on top of the meta service.

use std::time::Duration;

use common_types::table::TableId;
use log::debug;
use rand::Rng;

use crate::{AllocatorBusy, Error, MetaClientRef, Result};

/// Max retries before an [Error::AllocatorBusy] is surfaced to the caller.
const MAX_ALLOC_RETRIES: usize = 10;
/// Initial retry delay, doubled on every retry.
const INIT_ALLOC_BACKOFF_MS: u64 = 20;
/// Cap of one retry delay.
const MAX_ALLOC_BACKOFF_MS: u64 = 2_000;

/// Allocator of monotonically increasing 64-bit ids for one table.
///
/// The meta service serializes allocations through a distributed lock, so
/// contention shows up as [Error::AllocatorBusy]; this wrapper retries with
/// bounded exponential backoff and jitter before giving up.
pub struct IdAllocator {
    meta_client: MetaClientRef,
    db_id: i64,
    table_id: TableId,
    unsigned: bool,
}

impl IdAllocator {
    pub fn new(meta_client: MetaClientRef, db_id: i64, table_id: TableId, unsigned: bool) -> Self {
        Self {
            meta_client,
            db_id,
            table_id,
            unsigned,
        }
    }

    /// Reserve `[base, base + step)` and return `base`.
    pub async fn alloc(&self, step: u64) -> Result<i64> {
        let mut backoff_ms = INIT_ALLOC_BACKOFF_MS;
        let mut last_err = None;

        for retry in 0..MAX_ALLOC_RETRIES {
            match self
                .meta_client
                .alloc_auto_id(self.db_id, self.table_id, step, self.unsigned)
                .await
            {
                Ok(base) => {
                    debug!(
                        "Id range allocated, table_id:{}, base:{}, step:{}, retry:{}",
                        self.table_id, base, step, retry
                    );
                    return Ok(base);
                }
                Err(e @ Error::AllocatorBusy { .. }) => {
                    let jitter = rand::thread_rng().gen_range(0, backoff_ms + 1);
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_ALLOC_BACKOFF_MS);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Retries exhausted, surface the last busy error.
        match last_err {
            Some(e) => Err(e),
            None => AllocatorBusy {
                table_id: self.table_id,
            }
            .fail(),
        }
    }
}
