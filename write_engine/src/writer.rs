// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! The two-phase commit driver.
//!
//! One [WriteEngine::write] call is exactly one transaction:
//!
//! ```text
//! INIT -> LOCKED -> ENCODED -> PREWROTE_PRIMARY -> PREWROTE_ALL
//!      -> COMMITTED_PRIMARY -> DONE
//!                          \-> ABORT on any failure before COMMITTED_PRIMARY
//! ```
//!
//! Failures before the primary commit abort the write; the partial locks are
//! cleaned up by the store's lock resolver once their ttl expires. After the
//! primary commit the write is durable no matter what happens to the
//! secondaries, so later failures are logged and swallowed.

use std::{collections::HashMap, time::Duration};

use common_types::{
    datum::DatumKind,
    row::{Row, RowWithHandle},
    schema::TableInfo,
    table::{Handle, TableIdent},
    TsoTimestamp,
};
use common_util::{define_result, runtime::RuntimeRef};
use kv_client::{
    Backoff, Mutation, PdClientRef, SqlChannelRef, TxnClient, TxnKv, BATCH_PREWRITE_BACKOFF_MS,
};
use log::{debug, error, info, warn};
use meta_client::{allocator::IdAllocator, MetaClientRef};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::{
    conflict, dedup,
    expand::{self, expand_row, WriteKind},
    keepalive::TtlKeeper,
    normalize::{self, RowNormalizer},
    options::WriteOptions,
    partition::{self, RegionPartitioner},
    source::RowSourceRef,
    split,
};

/// Minimum tolerated value of the server-side delay-clean-table-lock setting.
pub const MIN_DELAY_CLEAN_TABLE_LOCK_MS: u64 = 60_000;
/// Safety margin between the lock-clean delay and the commit backoff budget.
pub const DELAY_CLEAN_TABLE_LOCK_AND_COMMIT_BACKOFF_DELTA_MS: u64 = 30_000;
/// Backoff budget of the primary commit: it must finish before the server
/// would clean a stale table lock.
pub const PRIMARY_KEY_COMMIT_BACKOFF_MS: u64 =
    MIN_DELAY_CLEAN_TABLE_LOCK_MS - DELAY_CLEAN_TABLE_LOCK_AND_COMMIT_BACKOFF_DELTA_MS;

/// Conflict-resolution fan-out when the write concurrency is unlimited.
const DEFAULT_CONFLICT_CONCURRENCY: usize = 4;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Batch write is disabled by options.\nBacktrace:\n{}", backtrace))]
    BatchWriteDisabled { backtrace: Backtrace },

    #[snafu(display(
        "Writing to a partitioned table is unsupported, table:{}.\nBacktrace:\n{}",
        table,
        backtrace
    ))]
    PartitionedTable { table: String, backtrace: Backtrace },

    #[snafu(display(
        "Writing to a table with generated columns is unsupported, table:{}.\nBacktrace:\n{}",
        table,
        backtrace
    ))]
    GeneratedColumns { table: String, backtrace: Backtrace },

    #[snafu(display("Invalid table descriptor, err:{}", source))]
    InvalidSchema { source: common_types::schema::Error },

    #[snafu(display("Failed to access meta service, err:{}", source))]
    Meta { source: meta_client::Error },

    #[snafu(display("Failed to access placement driver, err:{}", source))]
    Pd { source: kv_client::Error },

    #[snafu(display("Failed to access kv store, err:{}", source))]
    Kv { source: kv_client::Error },

    #[snafu(display("Failed to use the side channel, err:{}", source))]
    Channel { source: kv_client::Error },

    #[snafu(display("Failed to normalize input rows, err:{}", source))]
    Normalize { source: normalize::Error },

    #[snafu(display("Failed to deduplicate input rows, err:{}", source))]
    Dedup { source: dedup::Error },

    #[snafu(display("Failed to resolve conflicts, err:{}", source))]
    ResolveConflict { source: conflict::Error },

    #[snafu(display("Failed to expand rows into kv pairs, err:{}", source))]
    Expand { source: expand::Error },

    #[snafu(display("Failed to partition kv pairs, err:{}", source))]
    Partition { source: partition::Error },

    #[snafu(display("Failed to pre-split regions, err:{}", source))]
    Split { source: split::Error },

    #[snafu(display(
        "Input conflicts with stored rows and replace is off, conflicts:{}.\nBacktrace:\n{}",
        conflicts,
        backtrace
    ))]
    WriteConflict {
        conflicts: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Handle column is null or not an int in some row.\nBacktrace:\n{}",
        backtrace
    ))]
    NullHandle { backtrace: Backtrace },

    #[snafu(display(
        "Table lock requested but no side channel is configured.\nBacktrace:\n{}",
        backtrace
    ))]
    NoSideChannel { backtrace: Backtrace },

    #[snafu(display(
        "Server does not support table lock.\nBacktrace:\n{}",
        backtrace
    ))]
    TableLockUnsupported { backtrace: Backtrace },

    #[snafu(display(
        "Server delay-clean-table-lock is too small, delay_ms:{}, min_ms:{}.\nBacktrace:\n{}",
        delay_ms,
        min_ms,
        backtrace
    ))]
    DelayCleanTableLockTooSmall {
        delay_ms: u64,
        min_ms: u64,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid commit ts, start_ts:{}, commit_ts:{}.\nBacktrace:\n{}",
        start_ts,
        commit_ts,
        backtrace
    ))]
    InvalidCommitTs {
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Schema changed during the write, old_update_timestamp:{}, new_update_timestamp:{}.\nBacktrace:\n{}",
        old,
        new,
        backtrace
    ))]
    SchemaChanged {
        old: i64,
        new: i64,
        backtrace: Backtrace,
    },

    #[snafu(display("Side channel closed before commit.\nBacktrace:\n{}", backtrace))]
    ChannelClosed { backtrace: Backtrace },

    #[snafu(display("Failed to execute in runtime, err:{}", source))]
    RuntimeExec {
        source: common_util::runtime::Error,
    },
}

define_result!(Error);

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Rows persisted after deduplication.
    pub rows_written: usize,
    pub start_ts: TsoTimestamp,
    /// None when the input was empty and no transaction ran.
    pub commit_ts: Option<TsoTimestamp>,
}

/// The batch-write coordinator.
pub struct WriteEngine<T: TxnKv> {
    meta_client: MetaClientRef,
    pd_client: PdClientRef,
    store: T,
    channel: Option<SqlChannelRef>,
    runtime: RuntimeRef,
}

impl<T: TxnKv> WriteEngine<T> {
    pub fn new(
        meta_client: MetaClientRef,
        pd_client: PdClientRef,
        store: T,
        channel: Option<SqlChannelRef>,
        runtime: RuntimeRef,
    ) -> Self {
        Self {
            meta_client,
            pd_client,
            store,
            channel,
            runtime,
        }
    }

    /// Write `source` into `target` as one transaction.
    pub async fn write(
        &self,
        source: RowSourceRef,
        target: TableIdent,
        options: WriteOptions,
    ) -> Result<WriteReport> {
        ensure!(options.enable, BatchWriteDisabled);

        let table = self
            .meta_client
            .table_info(&target.database, &target.table)
            .await
            .context(Meta)?;
        ensure!(!table.partitioned, PartitionedTable { table: &table.name });
        ensure!(
            !table.has_generated_columns,
            GeneratedColumns { table: &table.name }
        );
        table.validate().context(InvalidSchema)?;

        let start_ts = self.pd_client.alloc_timestamp().await.context(Pd)?;
        info!(
            "Batch write begins, table:{}, table_id:{}, start_ts:{}",
            target, table.id, start_ts
        );

        let mut lock_held = self.acquire_table_lock(&target, &options).await?;

        let result = self
            .write_rows(&source, &target, &table, start_ts, &options, &mut lock_held)
            .await;

        match &result {
            Ok(report) => info!(
                "Batch write finished, table:{}, rows:{}, start_ts:{}, commit_ts:{:?}",
                target, report.rows_written, start_ts, report.commit_ts
            ),
            Err(e) => {
                error!(
                    "Batch write failed, table:{}, start_ts:{}, err:{}",
                    target, start_ts, e
                );
                // Partial locks are left for the store's resolver to clean.
                self.release_table_lock(&mut lock_held).await;
            }
        }

        result
    }

    async fn write_rows(
        &self,
        source: &RowSourceRef,
        target: &TableIdent,
        table: &TableInfo,
        start_ts: TsoTimestamp,
        options: &WriteOptions,
        lock_held: &mut bool,
    ) -> Result<WriteReport> {
        let rows = self.normalize_and_assign(source, table).await?;
        let rows = dedup::dedup_rows(table, rows).context(Dedup)?;
        debug!(
            "Input rows normalized and deduplicated, table:{}, rows:{}",
            target,
            rows.len()
        );

        let old_rows = self
            .resolve_conflicts(table, start_ts, &rows, options)
            .await?;
        ensure!(
            options.replace || old_rows.is_empty(),
            WriteConflict {
                conflicts: old_rows.len(),
            }
        );

        let kvs = build_mutations(table, &rows, &old_rows)?;

        if options.enable_region_split {
            let total_bytes = kvs
                .iter()
                .map(|kv| kv.key.len() + kv.value.len())
                .sum::<usize>() as u64;
            split::pre_split(
                self.channel.as_ref(),
                target,
                table,
                &rows,
                total_bytes,
                options,
            )
            .await
            .context(Split)?;
        }

        let regions = self.pd_client.table_regions(table.id).await.context(Pd)?;
        let partitioner =
            RegionPartitioner::try_new(regions, options.write_concurrency).context(Partition)?;
        let mut partitions = partitioner.partition(kvs);

        // The primary key is positional: the first element of the cached,
        // partitioned stream. The same partition set feeds both phases, so
        // the choice is stable.
        let primary = match take_primary(&mut partitions) {
            Some(primary) => primary,
            None => {
                self.release_table_lock(lock_held).await;
                return Ok(WriteReport {
                    rows_written: 0,
                    start_ts,
                    commit_ts: None,
                });
            }
        };

        let ttl_ms = options.lock_ttl_ms();
        let mut coord = self.store.new_client().context(Kv)?;
        coord
            .prewrite_primary(
                Backoff::with_budget_ms(BATCH_PREWRITE_BACKOFF_MS),
                primary.clone(),
                start_ts,
                ttl_ms,
            )
            .await
            .context(Kv)?;
        debug!("Primary key prewritten, start_ts:{}", start_ts);
        maybe_sleep(options.sleep_after_prewrite_primary_key_ms).await;

        let keeper = if options.is_ttl_update && coord.supports_ttl_update() {
            Some(TtlKeeper::start(
                &self.runtime,
                self.store.clone(),
                primary.key.clone(),
                start_ts,
                ttl_ms,
            ))
        } else {
            None
        };

        let commit_result = self
            .prewrite_and_commit(
                &mut coord, target, table, &partitions, &primary, start_ts, ttl_ms, options,
                *lock_held,
            )
            .await;

        if let Some(keeper) = keeper {
            keeper.stop().await;
        }
        let commit_ts = commit_result?;

        self.release_table_lock(lock_held).await;

        if options.skip_commit_secondary_key {
            debug!("Skip committing secondary keys, start_ts:{}", start_ts);
        } else {
            self.commit_secondaries(partitions, start_ts, commit_ts)
                .await;
        }

        if let Err(e) = coord.close().await {
            warn!("Failed to close coordinator client, err:{}", e);
        }

        Ok(WriteReport {
            rows_written: rows.len(),
            start_ts,
            commit_ts: Some(commit_ts),
        })
    }

    /// Secondary prewrite fan-out, commit ts acquisition, the schema-change
    /// and side-channel guards, and the primary commit.
    #[allow(clippy::too_many_arguments)]
    async fn prewrite_and_commit(
        &self,
        coord: &mut T::Client,
        target: &TableIdent,
        table: &TableInfo,
        partitions: &[Vec<Mutation>],
        primary: &Mutation,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
        options: &WriteOptions,
        lock_held: bool,
    ) -> Result<TsoTimestamp> {
        let mut workers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            if partition.is_empty() {
                continue;
            }
            let store = self.store.clone();
            let kvs = partition.clone();
            let primary_key = primary.key.clone();
            workers.push(self.runtime.spawn(async move {
                let mut client = store.new_client()?;
                let result = client
                    .prewrite_secondaries(&primary_key, kvs, start_ts, ttl_ms)
                    .await;
                if let Err(e) = client.close().await {
                    warn!("Failed to close worker client, err:{}", e);
                }
                result
            }));
        }
        for worker in workers {
            worker.await.context(RuntimeExec)?.context(Kv)?;
        }
        debug!("Secondary keys prewritten, start_ts:{}", start_ts);
        maybe_sleep(options.sleep_after_prewrite_secondary_key_ms).await;

        let commit_ts = self.pd_client.alloc_timestamp().await.context(Pd)?;
        ensure!(
            commit_ts > start_ts,
            InvalidCommitTs {
                start_ts,
                commit_ts,
            }
        );
        maybe_sleep(options.sleep_after_get_commit_ts_ms).await;

        if !lock_held {
            // Without the table lock, a re-read of the descriptor is the only
            // defense against a concurrent schema change.
            let current = self
                .meta_client
                .table_info(&target.database, &target.table)
                .await
                .context(Meta)?;
            ensure!(
                current.update_timestamp <= table.update_timestamp,
                SchemaChanged {
                    old: table.update_timestamp,
                    new: current.update_timestamp,
                }
            );
        }

        if let Some(channel) = &self.channel {
            ensure!(!channel.is_closed(), ChannelClosed);
        }

        coord
            .commit_primary(
                Backoff::with_budget_ms(PRIMARY_KEY_COMMIT_BACKOFF_MS),
                &primary.key,
                start_ts,
                commit_ts,
            )
            .await
            .context(Kv)?;
        info!(
            "Primary key committed, start_ts:{}, commit_ts:{}",
            start_ts, commit_ts
        );

        Ok(commit_ts)
    }

    /// Commit secondaries per partition in parallel, swallowing errors: the
    /// primary is committed, readers resolve residual locks through it.
    async fn commit_secondaries(
        &self,
        partitions: Vec<Vec<Mutation>>,
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) {
        let mut workers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            if partition.is_empty() {
                continue;
            }
            let store = self.store.clone();
            let keys: Vec<_> = partition.into_iter().map(|kv| kv.key).collect();
            workers.push(self.runtime.spawn(async move {
                let mut client = store.new_client()?;
                let result = client.commit_secondaries(keys, start_ts, commit_ts).await;
                if let Err(e) = client.close().await {
                    warn!("Failed to close worker client, err:{}", e);
                }
                result
            }));
        }

        for outcome in futures::future::join_all(workers).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Failed to commit secondary keys, commit_ts:{}, err:{}",
                    commit_ts, e
                ),
                Err(e) => warn!("Failed to join secondary commit task, err:{}", e),
            }
        }
    }

    /// Run normalization on the worker partitions and bind a handle to every
    /// row, in input order.
    async fn normalize_and_assign(
        &self,
        source: &RowSourceRef,
        table: &TableInfo,
    ) -> Result<Vec<RowWithHandle>> {
        let fields = source.field_names();
        let normalizer = RowNormalizer::try_new(table, &fields).context(Normalize)?;
        let num_partitions = source.num_partitions();

        // Surrogate handles and auto-increment ids are allocated as one
        // contiguous range each, so the row count must be known up front.
        let needs_count = normalizer.fills_auto_increment() || !table.pk_is_handle;
        let counts = if needs_count {
            self.count_partitions(source, num_partitions).await?
        } else {
            vec![0; num_partitions]
        };
        let total: usize = counts.iter().sum();

        let auto_base = if normalizer.fills_auto_increment() && total > 0 {
            let unsigned = table
                .auto_increment_column()
                .map(|c| c.kind == DatumKind::UInt)
                .unwrap_or(false);
            let allocator =
                IdAllocator::new(self.meta_client.clone(), table.db_id, table.id, unsigned);
            Some(allocator.alloc(total as u64).await.context(Meta)?)
        } else {
            None
        };

        let handle_base = if !table.pk_is_handle && total > 0 {
            let allocator =
                IdAllocator::new(self.meta_client.clone(), table.db_id, table.id, false);
            Some(allocator.alloc(total as u64).await.context(Meta)?)
        } else {
            None
        };

        let mut workers = Vec::with_capacity(num_partitions);
        let mut offset = 0i64;
        for index in 0..num_partitions {
            let source = source.clone();
            let normalizer = normalizer.clone();
            let auto_base = auto_base.map(|base| base + offset);
            let handle_base = handle_base.map(|base| base + offset);
            let handle_offset = table.handle_offset;
            workers.push(self.runtime.spawn_blocking(move || {
                normalize_partition(
                    &*source,
                    index,
                    &normalizer,
                    auto_base,
                    handle_base,
                    handle_offset,
                )
            }));
            offset += counts[index] as i64;
        }

        let mut rows = Vec::new();
        for worker in workers {
            rows.extend(worker.await.context(RuntimeExec)??);
        }
        Ok(rows)
    }

    async fn count_partitions(
        &self,
        source: &RowSourceRef,
        num_partitions: usize,
    ) -> Result<Vec<usize>> {
        let mut workers = Vec::with_capacity(num_partitions);
        for index in 0..num_partitions {
            let source = source.clone();
            workers.push(
                self.runtime
                    .spawn_blocking(move || source.partition(index).count()),
            );
        }
        let mut counts = Vec::with_capacity(num_partitions);
        for worker in workers {
            counts.push(worker.await.context(RuntimeExec)?);
        }
        Ok(counts)
    }

    /// Read existing rows colliding with the input, fanned out over worker
    /// chunks, each worker with its own client.
    async fn resolve_conflicts(
        &self,
        table: &TableInfo,
        start_ts: TsoTimestamp,
        rows: &[RowWithHandle],
        options: &WriteOptions,
    ) -> Result<Vec<RowWithHandle>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let workers = if options.write_concurrency > 0 {
            options.write_concurrency as usize
        } else {
            DEFAULT_CONFLICT_CONCURRENCY
        };
        let chunk_size = (rows.len() + workers - 1) / workers;
        let batch_size = options.snapshot_batch_get_size;

        let mut tasks = Vec::with_capacity(workers);
        for chunk in rows.chunks(chunk_size.max(1)) {
            let chunk = chunk.to_vec();
            let store = self.store.clone();
            let table = table.clone();
            tasks.push(self.runtime.spawn(async move {
                let mut client = store.new_client().context(Kv)?;
                let result =
                    conflict::resolve_partition(&mut client, &table, start_ts, &chunk, batch_size)
                        .await
                        .context(ResolveConflict);
                if let Err(e) = client.close().await {
                    warn!("Failed to close worker client, err:{}", e);
                }
                result
            }));
        }

        // The same old row may be found through its handle in one chunk and
        // through a unique index in another.
        let mut olds: HashMap<Handle, RowWithHandle> = HashMap::new();
        for task in tasks {
            for old in task.await.context(RuntimeExec)?? {
                olds.entry(old.handle).or_insert(old);
            }
        }
        Ok(olds.into_values().collect())
    }

    async fn acquire_table_lock(
        &self,
        target: &TableIdent,
        options: &WriteOptions,
    ) -> Result<bool> {
        if !options.use_table_lock {
            return Ok(false);
        }

        let channel = self.channel.as_ref().context(NoSideChannel)?;
        let supported = channel.supports_table_lock().await.context(Channel)?;
        if !supported {
            ensure!(options.allow_no_table_lock, TableLockUnsupported);
            warn!(
                "Server lacks table lock support, writing without it, table:{}",
                target
            );
            return Ok(false);
        }

        let delay_ms = channel.delay_clean_table_lock_ms().await.context(Channel)?;
        ensure!(
            delay_ms >= MIN_DELAY_CLEAN_TABLE_LOCK_MS,
            DelayCleanTableLockTooSmall {
                delay_ms,
                min_ms: MIN_DELAY_CLEAN_TABLE_LOCK_MS,
            }
        );

        channel.lock_table_write(target).await.context(Channel)?;
        info!("Table write lock acquired, table:{}", target);
        Ok(true)
    }

    async fn release_table_lock(&self, lock_held: &mut bool) {
        if !*lock_held {
            return;
        }
        *lock_held = false;
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.unlock_tables().await {
                warn!("Failed to release table lock, err:{}", e);
            }
        }
    }
}

/// Pop the first kv of the first non-empty partition.
fn take_primary(partitions: &mut [Vec<Mutation>]) -> Option<Mutation> {
    for partition in partitions.iter_mut() {
        if !partition.is_empty() {
            return Some(partition.remove(0));
        }
    }
    None
}

/// Expand puts for the deduplicated input and deletes for the conflicting old
/// rows, then merge by encoded key: a put always masks a delete of the same
/// key, so a row overwritten in place is written once, not deleted and
/// rewritten.
fn build_mutations(
    table: &TableInfo,
    rows: &[RowWithHandle],
    old_rows: &[RowWithHandle],
) -> Result<Vec<Mutation>> {
    let mut merged: HashMap<Vec<u8>, Mutation> = HashMap::new();
    let mut key_order: Vec<Vec<u8>> = Vec::new();

    for row in rows {
        for kv in expand_row(table, row, WriteKind::Put).context(Expand)? {
            if !merged.contains_key(&kv.key) {
                key_order.push(kv.key.clone());
                merged.insert(kv.key.clone(), kv);
            }
        }
    }
    for row in old_rows {
        for kv in expand_row(table, row, WriteKind::Delete).context(Expand)? {
            if !merged.contains_key(&kv.key) {
                key_order.push(kv.key.clone());
                merged.insert(kv.key.clone(), kv);
            }
        }
    }

    let mut kvs = Vec::with_capacity(key_order.len());
    for key in key_order {
        if let Some(kv) = merged.remove(&key) {
            kvs.push(kv);
        }
    }
    Ok(kvs)
}

fn normalize_partition(
    source: &dyn crate::source::RowSource,
    index: usize,
    normalizer: &RowNormalizer,
    auto_base: Option<i64>,
    handle_base: Option<i64>,
    handle_offset: Option<usize>,
) -> Result<Vec<RowWithHandle>> {
    let mut rows = Vec::new();
    for (row_index, source_row) in source.partition(index).enumerate() {
        let auto_id = auto_base.map(|base| base + row_index as i64);
        let row = normalizer
            .normalize(source_row, auto_id)
            .context(Normalize)?;
        let handle = match handle_base {
            Some(base) => base + row_index as i64,
            None => extract_handle(&row, handle_offset)?,
        };
        rows.push(RowWithHandle::new(row, handle));
    }
    Ok(rows)
}

/// Handle of a pk-is-handle row: the value of its handle column.
fn extract_handle(row: &Row, handle_offset: Option<usize>) -> Result<Handle> {
    handle_offset
        .and_then(|offset| row.column(offset).as_i64())
        .context(NullHandle)
}

async fn maybe_sleep(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
