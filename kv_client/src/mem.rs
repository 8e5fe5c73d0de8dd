// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! In-memory store cluster, for tests.
//!
//! [MemStore] keeps real percolator bookkeeping: a lock column, a data column
//! versioned by `start_ts` and a write column versioned by `commit_ts`.
//! Snapshot reads only see committed versions, so the engine tests can verify
//! atomicity and visibility the same way they would against a real cluster.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use common_types::{
    table::{Handle, TableId, TableIdent},
    TsoTimestamp,
};

use crate::{
    backoff::Backoff,
    channel::SqlChannel,
    hex_key,
    pd::PdClient,
    txn::{TxnClient, TxnKv},
    types::{Mutation, RegionInfo},
    ChannelClosed, ClientClosed, Error, KeyLocked, LockNotFound, Result, WriteConflict,
};

#[derive(Debug, Clone)]
struct LockEntry {
    primary: Vec<u8>,
    start_ts: TsoTimestamp,
    ttl_ms: u64,
}

#[derive(Default)]
struct StoreKv {
    /// key -> start_ts -> tentative value.
    data: BTreeMap<Vec<u8>, BTreeMap<TsoTimestamp, Vec<u8>>>,
    /// key -> lock.
    locks: HashMap<Vec<u8>, LockEntry>,
    /// key -> commit_ts -> start_ts.
    writes: BTreeMap<Vec<u8>, BTreeMap<TsoTimestamp, TsoTimestamp>>,
}

struct StoreState {
    kv: Mutex<StoreKv>,
    tso: AtomicU64,
    regions: Mutex<Vec<RegionInfo>>,
    supports_ttl_update: AtomicBool,
}

/// In-memory percolator store.
#[derive(Clone)]
pub struct MemStore {
    state: Arc<StoreState>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Store with a single region covering the whole keyspace.
    pub fn new() -> Self {
        let region = RegionInfo {
            id: 1,
            start_key: Vec::new(),
            end_key: Vec::new(),
        };
        Self {
            state: Arc::new(StoreState {
                kv: Mutex::new(StoreKv::default()),
                tso: AtomicU64::new(0),
                regions: Mutex::new(vec![region]),
                supports_ttl_update: AtomicBool::new(true),
            }),
        }
    }

    /// Re-shard the keyspace at the given boundary keys.
    pub fn split_at(&self, boundaries: &[Vec<u8>]) {
        let mut sorted = boundaries.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut regions = Vec::with_capacity(sorted.len() + 1);
        let mut start = Vec::new();
        for (i, boundary) in sorted.iter().enumerate() {
            regions.push(RegionInfo {
                id: i as u64 + 1,
                start_key: start.clone(),
                end_key: boundary.clone(),
            });
            start = boundary.clone();
        }
        regions.push(RegionInfo {
            id: sorted.len() as u64 + 1,
            start_key: start,
            end_key: Vec::new(),
        });

        *self.state.regions.lock().unwrap() = regions;
    }

    pub fn set_supports_ttl_update(&self, supported: bool) {
        self.state
            .supports_ttl_update
            .store(supported, Ordering::Relaxed);
    }

    /// A pd client sharing this store's oracle and region table.
    pub fn pd_client(&self) -> MemPdClient {
        MemPdClient {
            state: self.state.clone(),
        }
    }

    /// Committed value visible at `ts`, ignoring locks. Test helper.
    pub fn read_committed(&self, key: &[u8], ts: TsoTimestamp) -> Option<Vec<u8>> {
        let kv = self.state.kv.lock().unwrap();
        Self::committed_value(&kv, key, ts)
    }

    /// Number of outstanding locks. Test helper.
    pub fn lock_count(&self) -> usize {
        self.state.kv.lock().unwrap().locks.len()
    }

    /// Ttl currently recorded on the lock of `key`. Test helper.
    pub fn lock_ttl_ms(&self, key: &[u8]) -> Option<u64> {
        let kv = self.state.kv.lock().unwrap();
        kv.locks.get(key).map(|l| l.ttl_ms)
    }

    fn committed_value(kv: &StoreKv, key: &[u8], ts: TsoTimestamp) -> Option<Vec<u8>> {
        let writes = kv.writes.get(key)?;
        let (_, start_ts) = writes.range(..=ts).next_back()?;
        let value = kv.data.get(key)?.get(start_ts)?;
        if value.is_empty() {
            // Delete sentinel.
            None
        } else {
            Some(value.clone())
        }
    }

    fn try_prewrite(
        kv: &mut StoreKv,
        mutation: Mutation,
        primary: &[u8],
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()> {
        if let Some(writes) = kv.writes.get(&mutation.key) {
            if let Some((&commit_ts, _)) = writes.iter().next_back() {
                if commit_ts > start_ts {
                    return WriteConflict {
                        key: hex_key(&mutation.key),
                        start_ts,
                        conflict_commit_ts: commit_ts,
                    }
                    .fail();
                }
            }
        }

        if let Some(lock) = kv.locks.get(&mutation.key) {
            if lock.start_ts != start_ts {
                return KeyLocked {
                    key: hex_key(&mutation.key),
                    lock_start_ts: lock.start_ts,
                }
                .fail();
            }
        }

        kv.locks.insert(
            mutation.key.clone(),
            LockEntry {
                primary: primary.to_vec(),
                start_ts,
                ttl_ms,
            },
        );
        kv.data
            .entry(mutation.key)
            .or_default()
            .insert(start_ts, mutation.value);

        Ok(())
    }

    fn commit_key(
        kv: &mut StoreKv,
        key: &[u8],
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) -> Result<()> {
        let lock_is_ours = matches!(kv.locks.get(key), Some(lock) if lock.start_ts == start_ts);
        if lock_is_ours {
            kv.locks.remove(key);
            kv.writes
                .entry(key.to_vec())
                .or_default()
                .insert(commit_ts, start_ts);
            return Ok(());
        }

        // No lock of ours: committing twice is a no-op, anything else means
        // the lock was resolved away.
        let already_committed = kv
            .writes
            .get(key)
            .map(|w| w.values().any(|s| *s == start_ts))
            .unwrap_or(false);
        if already_committed {
            Ok(())
        } else {
            LockNotFound {
                key: hex_key(key),
                start_ts,
            }
            .fail()
        }
    }
}

/// Pd client of [MemStore].
pub struct MemPdClient {
    state: Arc<StoreState>,
}

#[async_trait]
impl PdClient for MemPdClient {
    async fn alloc_timestamp(&self) -> Result<TsoTimestamp> {
        Ok(self.state.tso.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn table_regions(&self, _table_id: TableId) -> Result<Vec<RegionInfo>> {
        Ok(self.state.regions.lock().unwrap().clone())
    }
}

impl TxnKv for MemStore {
    type Client = MemTxnClient;

    fn new_client(&self) -> Result<Self::Client> {
        Ok(MemTxnClient {
            state: self.state.clone(),
            closed: false,
        })
    }
}

pub struct MemTxnClient {
    state: Arc<StoreState>,
    closed: bool,
}

impl MemTxnClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            ClientClosed.fail()
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TxnClient for MemTxnClient {
    async fn prewrite_primary(
        &mut self,
        mut backoff: Backoff,
        mutation: Mutation,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        let primary = mutation.key.clone();
        loop {
            let res = {
                let mut kv = self.state.kv.lock().unwrap();
                MemStore::try_prewrite(&mut kv, mutation.clone(), &primary, start_ts, ttl_ms)
            };
            match res {
                Err(e @ Error::KeyLocked { .. }) => {
                    if backoff.sleep().await {
                        continue;
                    }
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    async fn prewrite_secondaries(
        &mut self,
        primary_key: &[u8],
        mutations: Vec<Mutation>,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut kv = self.state.kv.lock().unwrap();
        for mutation in mutations {
            MemStore::try_prewrite(&mut kv, mutation, primary_key, start_ts, ttl_ms)?;
        }
        Ok(())
    }

    async fn commit_primary(
        &mut self,
        _backoff: Backoff,
        key: &[u8],
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut kv = self.state.kv.lock().unwrap();
        MemStore::commit_key(&mut kv, key, start_ts, commit_ts)
    }

    async fn commit_secondaries(
        &mut self,
        keys: Vec<Vec<u8>>,
        start_ts: TsoTimestamp,
        commit_ts: TsoTimestamp,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut kv = self.state.kv.lock().unwrap();
        for key in keys {
            MemStore::commit_key(&mut kv, &key, start_ts, commit_ts)?;
        }
        Ok(())
    }

    async fn txn_heartbeat(
        &mut self,
        primary_key: &[u8],
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut kv = self.state.kv.lock().unwrap();
        match kv.locks.get_mut(primary_key) {
            Some(lock) if lock.start_ts == start_ts => {
                lock.ttl_ms = ttl_ms;
                Ok(())
            }
            _ => LockNotFound {
                key: hex_key(primary_key),
                start_ts,
            }
            .fail(),
        }
    }

    fn supports_ttl_update(&self) -> bool {
        self.state.supports_ttl_update.load(Ordering::Relaxed)
    }

    async fn snapshot_batch_get(
        &mut self,
        ts: TsoTimestamp,
        keys: Vec<Vec<u8>>,
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.ensure_open()?;
        let kv = self.state.kv.lock().unwrap();
        let mut result = HashMap::new();
        for key in keys {
            if let Some(value) = MemStore::committed_value(&kv, &key, ts) {
                result.insert(key, value);
            }
        }
        Ok(result)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Recorded table-range split hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSplit {
    pub table: String,
    pub lower: Handle,
    pub upper: Handle,
    pub region_num: u64,
}

/// Recorded index-range split hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSplit {
    pub table: String,
    pub index_name: String,
    pub lower: String,
    pub upper: String,
    pub region_num: u64,
}

/// In-memory SQL side-channel.
pub struct MemSqlChannel {
    supports_table_lock: bool,
    delay_clean_ms: u64,
    fail_splits: bool,
    closed: AtomicBool,
    locked: Mutex<Option<TableIdent>>,
    table_splits: Mutex<Vec<TableSplit>>,
    index_splits: Mutex<Vec<IndexSplit>>,
}

impl Default for MemSqlChannel {
    fn default() -> Self {
        Self {
            supports_table_lock: true,
            delay_clean_ms: 60_000,
            fail_splits: false,
            closed: AtomicBool::new(false),
            locked: Mutex::new(None),
            table_splits: Mutex::new(Vec::new()),
            index_splits: Mutex::new(Vec::new()),
        }
    }
}

impl MemSqlChannel {
    pub fn without_table_lock() -> Self {
        Self {
            supports_table_lock: false,
            ..Default::default()
        }
    }

    pub fn with_delay_clean_ms(delay_clean_ms: u64) -> Self {
        Self {
            delay_clean_ms,
            ..Default::default()
        }
    }

    pub fn failing_splits() -> Self {
        Self {
            fail_splits: true,
            ..Default::default()
        }
    }

    /// Drop the connection. Test hook.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn locked_table(&self) -> Option<TableIdent> {
        self.locked.lock().unwrap().clone()
    }

    pub fn table_splits(&self) -> Vec<TableSplit> {
        self.table_splits.lock().unwrap().clone()
    }

    pub fn index_splits(&self) -> Vec<IndexSplit> {
        self.index_splits.lock().unwrap().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            ChannelClosed.fail()
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SqlChannel for MemSqlChannel {
    async fn supports_table_lock(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.supports_table_lock)
    }

    async fn delay_clean_table_lock_ms(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.delay_clean_ms)
    }

    async fn lock_table_write(&self, table: &TableIdent) -> Result<()> {
        self.ensure_open()?;
        *self.locked.lock().unwrap() = Some(table.clone());
        Ok(())
    }

    async fn unlock_tables(&self) -> Result<()> {
        self.ensure_open()?;
        *self.locked.lock().unwrap() = None;
        Ok(())
    }

    async fn split_table_region(
        &self,
        table: &TableIdent,
        lower: Handle,
        upper: Handle,
        region_num: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.fail_splits {
            return crate::Unsupported {
                what: "split table region".to_string(),
            }
            .fail();
        }
        self.table_splits.lock().unwrap().push(TableSplit {
            table: table.to_string(),
            lower,
            upper,
            region_num,
        });
        Ok(())
    }

    async fn split_index_region(
        &self,
        table: &TableIdent,
        index_name: &str,
        lower: &str,
        upper: &str,
        region_num: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.fail_splits {
            return crate::Unsupported {
                what: "split index region".to_string(),
            }
            .fail();
        }
        self.index_splits.lock().unwrap().push(IndexSplit {
            table: table.to_string(),
            index_name: index_name.to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
            region_num,
        });
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}
