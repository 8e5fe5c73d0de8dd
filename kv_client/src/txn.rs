// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Transactional KV RPC surface.
//!
//! The store runs a percolator-style protocol: prewrite leaves a lock and a
//! tentative value at `start_ts`, commit replaces the lock with a committed
//! write record at `commit_ts`. The single primary lock anchors the
//! transaction; once the primary is committed the write is durable and
//! residual secondary locks are resolved lazily through it.

use std::collections::HashMap;

use async_trait::async_trait;
use common_types::TsoTimestamp;

use crate::{backoff::Backoff, types::Mutation, Result};

/// Handle to the store, cloned freely across workers.
///
/// Every worker opens its own [TxnClient] and closes it when the partition
/// task ends; the coordinator keeps one client of its own for the primary
/// key operations.
pub trait TxnKv: Clone + Send + Sync + 'static {
    type Client: TxnClient;

    fn new_client(&self) -> Result<Self::Client>;
}

/// One connection to the store.
#[async_trait]
pub trait TxnClient: Send {
    /// Write the lock+data pair of the primary key at `start_ts`.
    async fn prewrite_primary(
        &mut self,
        backoff: Backoff,
        mutation: Mutation,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()>;

    /// Write locks+data of secondary keys, all pointing at the primary.
    async fn prewrite_secondaries(
        &mut self,
        primary_key: &[u8],
        mutations: Vec<Mutation>,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()>;

    /// Convert the primary lock into a committed write record.
    async fn commit_primary(
        &mut self,
        backoff: Backoff,
        key: &[u8],
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) -> Result<()>;

    /// Commit secondary locks. Individually best-effort: once the primary is
    /// committed, readers resolve residual locks through it anyway.
    async fn commit_secondaries(
        &mut self,
        keys: Vec<Vec<u8>>,
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) -> Result<()>;

    /// Extend the ttl of the primary lock.
    async fn txn_heartbeat(
        &mut self,
        primary_key: &[u8],
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()>;

    /// Whether the store supports refreshing a lock's ttl online.
    fn supports_ttl_update(&self) -> bool;

    /// Consistent point read of `keys` at `ts`. Missing keys are absent from
    /// the result map.
    async fn snapshot_batch_get(
        &mut self,
        ts: TsoTimestamp,
        keys: Vec<Vec<u8>>,
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>>;

    async fn close(&mut self) -> Result<()>;
}
