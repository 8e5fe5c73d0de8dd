// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! End-to-end tests of the batch-write engine against the in-memory cluster.

use std::{sync::Arc, time::Duration};

use common_types::{
    datum::{Datum, DatumKind},
    row::Row,
    schema::{ColumnSchema, IndexSchema, TableInfo},
    table::TableIdent,
};
use common_util::runtime;
use kv_client::{
    mem::{MemSqlChannel, MemStore},
    SqlChannelRef,
};
use meta_client::mem::MemMetaClient;
use write_engine::{
    kv_encoder::{decode_index_handle, IndexKeyEncoder, RowKeyEncoder, RowValueDecoder},
    writer::{Error, WriteEngine},
    MemSource, RowSourceRef, WriteOptions,
};

fn column(
    id: i64,
    name: &str,
    offset: usize,
    kind: DatumKind,
    nullable: bool,
    auto_increment: bool,
) -> ColumnSchema {
    ColumnSchema {
        id,
        name: name.to_string(),
        offset,
        kind,
        nullable,
        auto_increment,
    }
}

/// `t(a int, b int)`, surrogate handles, no indices.
fn plain_table() -> TableInfo {
    TableInfo {
        id: 101,
        db_id: 1,
        name: "t".to_string(),
        update_timestamp: 10,
        pk_is_handle: false,
        handle_offset: None,
        columns: vec![
            column(1, "a", 0, DatumKind::Int, false, false),
            column(2, "b", 1, DatumKind::Int, false, false),
        ],
        indices: Vec::new(),
        partitioned: false,
        has_generated_columns: false,
    }
}

/// `t(id int primary key, uk int unique, v varchar)`, pk is the handle.
fn pk_uk_table() -> TableInfo {
    TableInfo {
        id: 102,
        db_id: 1,
        name: "t".to_string(),
        update_timestamp: 10,
        pk_is_handle: true,
        handle_offset: Some(0),
        columns: vec![
            column(1, "id", 0, DatumKind::Int, false, false),
            column(2, "uk", 1, DatumKind::Int, false, false),
            column(3, "v", 2, DatumKind::String, true, false),
        ],
        indices: vec![IndexSchema {
            id: 1,
            name: "uk".to_string(),
            unique: true,
            col_offsets: vec![1],
        }],
        partitioned: false,
        has_generated_columns: false,
    }
}

/// `t(id int auto_increment primary key, v varchar)`.
fn auto_table() -> TableInfo {
    TableInfo {
        id: 103,
        db_id: 1,
        name: "t".to_string(),
        update_timestamp: 10,
        pk_is_handle: true,
        handle_offset: Some(0),
        columns: vec![
            column(1, "id", 0, DatumKind::Int, false, true),
            column(2, "v", 1, DatumKind::String, false, false),
        ],
        indices: Vec::new(),
        partitioned: false,
        has_generated_columns: false,
    }
}

fn ident() -> TableIdent {
    TableIdent::new("db", "t")
}

fn new_engine(
    store: &MemStore,
    meta: Arc<MemMetaClient>,
    channel: Option<Arc<MemSqlChannel>>,
) -> WriteEngine<MemStore> {
    let rt = Arc::new(
        runtime::Builder::default()
            .thread_name("write-worker")
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap(),
    );
    WriteEngine::new(
        meta,
        Arc::new(store.pd_client()),
        store.clone(),
        channel.map(|c| c as SqlChannelRef),
        rt,
    )
}

fn setup(table: TableInfo) -> (MemStore, Arc<MemMetaClient>, WriteEngine<MemStore>) {
    let _ = env_logger::try_init();
    let store = MemStore::new();
    let meta = Arc::new(MemMetaClient::default());
    meta.register_table("db", table);
    let engine = new_engine(&store, meta.clone(), None);
    (store, meta, engine)
}

fn read_row(store: &MemStore, table: &TableInfo, handle: i64, ts: u64) -> Option<Row> {
    let key = RowKeyEncoder.encode_to_vec(table.id, handle).unwrap();
    store
        .read_committed(&key, ts)
        .map(|value| RowValueDecoder::new(table).decode(&value, handle).unwrap())
}

fn read_unique_index(store: &MemStore, table: &TableInfo, row: &Row, ts: u64) -> Option<i64> {
    let encoder = IndexKeyEncoder::from_schema(table.id, &table.indices[0]);
    let key = encoder.encode_to_vec(row, 0).unwrap();
    store
        .read_committed(&key, ts)
        .map(|value| decode_index_handle(&value).unwrap())
}

fn int_rows(rows: &[&[i64]]) -> Vec<Vec<Datum>> {
    rows.iter()
        .map(|r| r.iter().map(|v| Datum::Int(*v)).collect())
        .collect()
}

fn pk_uk_row(id: i64, uk: i64, v: &str) -> Vec<Datum> {
    vec![Datum::Int(id), Datum::Int(uk), Datum::String(v.to_string())]
}

/// Drops the engine (and the runtime it owns) off the async test's
/// executor thread; tokio forbids blocking-dropping a runtime from within
/// another runtime's task.
async fn teardown(engine: WriteEngine<MemStore>) {
    tokio::task::spawn_blocking(move || drop(engine))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fresh_insert_no_pk_handle() {
    let table = plain_table();
    let (store, _meta, engine) = setup(table.clone());

    // Two partitions, writeConcurrency = 2.
    let source: RowSourceRef = Arc::new(MemSource::new(
        vec!["a", "b"],
        vec![int_rows(&[&[1, 2]]), int_rows(&[&[3, 4]])],
    ));
    let options = WriteOptions {
        write_concurrency: 2,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();

    assert_eq!(2, report.rows_written);
    let commit_ts = report.commit_ts.unwrap();
    assert!(commit_ts > report.start_ts);

    // Handles are allocated contiguously from the meta cursor (base 1).
    let row1 = read_row(&store, &table, 1, commit_ts).unwrap();
    assert_eq!(&Datum::Int(1), row1.column(0));
    assert_eq!(&Datum::Int(2), row1.column(1));
    let row2 = read_row(&store, &table, 2, commit_ts).unwrap();
    assert_eq!(&Datum::Int(3), row2.column(0));
    assert_eq!(&Datum::Int(4), row2.column(1));

    // Atomicity: nothing was visible before the commit timestamp.
    assert!(read_row(&store, &table, 1, commit_ts - 1).is_none());
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

#[tokio::test]
async fn test_replace_on_unique_index_conflict() {
    let table = pk_uk_table();
    let (store, _meta, engine) = setup(table.clone());

    let seed: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 10, "a")],
    ));
    engine
        .write(seed, ident(), WriteOptions::default())
        .await
        .unwrap();

    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 10, "b")],
    ));
    let options = WriteOptions {
        replace: true,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();
    let commit_ts = report.commit_ts.unwrap();

    // The row was overwritten in place.
    let row = read_row(&store, &table, 1, commit_ts).unwrap();
    assert_eq!(&Datum::String("b".to_string()), row.column(2));

    // The unique index entry still resolves to handle 1.
    assert_eq!(Some(1), read_unique_index(&store, &table, &row, commit_ts));
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

#[tokio::test]
async fn test_reject_on_conflict_without_replace() {
    let table = pk_uk_table();
    let (store, _meta, engine) = setup(table.clone());

    let seed: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 10, "a")],
    ));
    let seeded = engine
        .write(seed, ident(), WriteOptions::default())
        .await
        .unwrap();
    let seeded_ts = seeded.commit_ts.unwrap();

    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 10, "b")],
    ));
    let err = engine
        .write(source, ident(), WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WriteConflict { .. }));

    // No change in the store, no leftover locks: the write failed before any
    // prewrite.
    let row = read_row(&store, &table, 1, seeded_ts + 10).unwrap();
    assert_eq!(&Datum::String("a".to_string()), row.column(2));
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

#[tokio::test]
async fn test_insert_over_delete_merge() {
    let table = pk_uk_table();
    let (store, _meta, engine) = setup(table.clone());

    // Pre-existing third row owns uk=5 at handle 3.
    let seed: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(3, 5, "old")],
    ));
    engine
        .write(seed, ident(), WriteOptions::default())
        .await
        .unwrap();

    // Two input rows share uk=5 with different handles; dedup keeps the
    // first, conflict resolution discovers the stored row.
    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 5, "x"), pk_uk_row(2, 5, "y")],
    ));
    let options = WriteOptions {
        replace: true,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();
    assert_eq!(1, report.rows_written);
    let commit_ts = report.commit_ts.unwrap();

    // Kept row persisted.
    let row = read_row(&store, &table, 1, commit_ts).unwrap();
    assert_eq!(&Datum::String("x".to_string()), row.column(2));
    // Deduplicated sibling never existed.
    assert!(read_row(&store, &table, 2, commit_ts).is_none());
    // Old owner of uk=5 was deleted in the same transaction.
    assert!(read_row(&store, &table, 3, commit_ts).is_none());
    // The index entry points at the kept handle.
    assert_eq!(Some(1), read_unique_index(&store, &table, &row, commit_ts));

    teardown(engine).await;
}

#[tokio::test]
async fn test_schema_change_aborts_before_commit() {
    let table = plain_table();
    let (store, meta, engine) = setup(table.clone());

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        sleep_after_prewrite_primary_key_ms: 300,
        ..Default::default()
    };

    // Schema changes while the write pauses after the primary prewrite.
    let bumper = {
        let meta = meta.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            meta.bump_update_timestamp("db", "t");
        })
    };

    let err = engine.write(source, ident(), options).await.unwrap_err();
    bumper.await.unwrap();
    assert!(matches!(err, Error::SchemaChanged { .. }));

    // Nothing committed; the partial locks wait for the store's resolver.
    assert!(read_row(&store, &table, 1, u64::MAX).is_none());
    assert!(store.lock_count() > 0);

    teardown(engine).await;
}

#[tokio::test]
async fn test_auto_increment_allocation() {
    let table = auto_table();
    let (store, _meta, engine) = setup(table.clone());

    // Column `id` omitted from the input.
    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["v"],
        vec![
            vec![Datum::String("x".to_string())],
            vec![Datum::String("y".to_string())],
            vec![Datum::String("z".to_string())],
        ],
    ));
    let report = engine
        .write(source, ident(), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(3, report.rows_written);
    let commit_ts = report.commit_ts.unwrap();

    // Allocator base is 1: ids B, B+1, B+2 in input order.
    for (offset, v) in ["x", "y", "z"].iter().enumerate() {
        let handle = 1 + offset as i64;
        let row = read_row(&store, &table, handle, commit_ts).unwrap();
        assert_eq!(&Datum::Int(handle), row.column(0));
        assert_eq!(&Datum::String(v.to_string()), row.column(1));
    }

    teardown(engine).await;
}

#[tokio::test]
async fn test_dedup_persists_exactly_one_row() {
    let table = pk_uk_table();
    let (store, _meta, engine) = setup(table.clone());

    // Same handle twice, then same unique key under another handle.
    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![
            pk_uk_row(1, 10, "first"),
            pk_uk_row(1, 11, "second"),
            pk_uk_row(2, 10, "third"),
        ],
    ));
    let report = engine
        .write(source, ident(), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(1, report.rows_written);
    let commit_ts = report.commit_ts.unwrap();

    let row = read_row(&store, &table, 1, commit_ts).unwrap();
    assert_eq!(&Datum::String("first".to_string()), row.column(2));
    assert!(read_row(&store, &table, 2, commit_ts).is_none());

    teardown(engine).await;
}

#[tokio::test]
async fn test_multi_region_routing() {
    let table = plain_table();
    let (store, _meta, engine) = setup(table.clone());

    // Shard the keyspace in the middle of the table's handle range.
    let boundary = RowKeyEncoder.encode_to_vec(table.id, 3).unwrap();
    store.split_at(&[boundary]);

    let rows: Vec<&[i64]> = vec![&[1, 1], &[2, 2], &[3, 3], &[4, 4], &[5, 5]];
    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&rows)));
    let options = WriteOptions {
        write_concurrency: 2,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();
    let commit_ts = report.commit_ts.unwrap();

    for handle in 1..=5 {
        let row = read_row(&store, &table, handle, commit_ts).unwrap();
        assert_eq!(&Datum::Int(handle), row.column(0));
    }
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

#[tokio::test]
async fn test_empty_input_is_a_noop() {
    let table = plain_table();
    let (store, _meta, engine) = setup(table);

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], Vec::new()));
    let report = engine
        .write(source, ident(), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(0, report.rows_written);
    assert!(report.commit_ts.is_none());
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

#[tokio::test]
async fn test_batch_write_disabled() {
    let (_store, _meta, engine) = setup(plain_table());
    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        enable: false,
        ..Default::default()
    };
    let err = engine.write(source, ident(), options).await.unwrap_err();
    assert!(matches!(err, Error::BatchWriteDisabled { .. }));

    teardown(engine).await;
}

#[tokio::test]
async fn test_partitioned_table_rejected() {
    let mut table = plain_table();
    table.partitioned = true;
    let (_store, _meta, engine) = setup(table);

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let err = engine
        .write(source, ident(), WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PartitionedTable { .. }));

    teardown(engine).await;
}

#[tokio::test]
async fn test_table_lock_acquired_and_released() {
    let _ = env_logger::try_init();
    let store = MemStore::new();
    let meta = Arc::new(MemMetaClient::default());
    meta.register_table("db", plain_table());
    let channel = Arc::new(MemSqlChannel::default());
    let engine = new_engine(&store, meta, Some(channel.clone()));

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        use_table_lock: true,
        ..Default::default()
    };
    engine.write(source, ident(), options).await.unwrap();

    // Lock released after the primary commit.
    assert!(channel.locked_table().is_none());

    teardown(engine).await;
}

#[tokio::test]
async fn test_table_lock_unsupported() {
    let _ = env_logger::try_init();
    let store = MemStore::new();
    let meta = Arc::new(MemMetaClient::default());
    meta.register_table("db", plain_table());
    let channel = Arc::new(MemSqlChannel::without_table_lock());
    let engine = new_engine(&store, meta, Some(channel));

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        use_table_lock: true,
        ..Default::default()
    };
    let err = engine
        .write(source.clone(), ident(), options.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TableLockUnsupported { .. }));

    // The escape hatch writes without the lock instead.
    let options = WriteOptions {
        allow_no_table_lock: true,
        ..options
    };
    engine.write(source, ident(), options).await.unwrap();

    teardown(engine).await;
}

#[tokio::test]
async fn test_delay_clean_table_lock_guard() {
    let _ = env_logger::try_init();
    let store = MemStore::new();
    let meta = Arc::new(MemMetaClient::default());
    meta.register_table("db", plain_table());
    let channel = Arc::new(MemSqlChannel::with_delay_clean_ms(10_000));
    let engine = new_engine(&store, meta, Some(channel));

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        use_table_lock: true,
        ..Default::default()
    };
    let err = engine.write(source, ident(), options).await.unwrap_err();
    assert!(matches!(err, Error::DelayCleanTableLockTooSmall { .. }));

    teardown(engine).await;
}

#[tokio::test]
async fn test_channel_closed_before_commit_aborts() {
    let _ = env_logger::try_init();
    let table = plain_table();
    let store = MemStore::new();
    let meta = Arc::new(MemMetaClient::default());
    meta.register_table("db", table.clone());
    let channel = Arc::new(MemSqlChannel::default());
    let engine = new_engine(&store, meta, Some(channel.clone()));

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        sleep_after_get_commit_ts_ms: 300,
        ..Default::default()
    };

    let closer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.close();
    });

    let err = engine.write(source, ident(), options).await.unwrap_err();
    closer.await.unwrap();
    assert!(matches!(err, Error::ChannelClosed { .. }));
    assert!(read_row(&store, &table, 1, u64::MAX).is_none());

    teardown(engine).await;
}

#[tokio::test]
async fn test_skip_commit_secondary_key_leaves_locks() {
    let table = pk_uk_table();
    let (store, _meta, engine) = setup(table.clone());

    let source: RowSourceRef = Arc::new(MemSource::single(
        vec!["id", "uk", "v"],
        vec![pk_uk_row(1, 10, "a")],
    ));
    let options = WriteOptions {
        skip_commit_secondary_key: true,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();
    assert!(report.commit_ts.is_some());

    // Primary committed, secondary locks left for lazy resolution.
    assert!(store.lock_count() > 0);

    teardown(engine).await;
}

#[tokio::test]
async fn test_ttl_keepalive_runs_during_write() {
    let table = plain_table();
    let (store, _meta, engine) = setup(table.clone());

    let source: RowSourceRef = Arc::new(MemSource::single(vec!["a", "b"], int_rows(&[&[1, 2]])));
    let options = WriteOptions {
        is_ttl_update: true,
        lock_ttl_seconds: 1,
        sleep_after_prewrite_secondary_key_ms: 400,
        ..Default::default()
    };
    let report = engine.write(source, ident(), options).await.unwrap();
    let commit_ts = report.commit_ts.unwrap();
    assert!(read_row(&store, &table, 1, commit_ts).is_some());
    assert_eq!(0, store.lock_count());

    teardown(engine).await;
}

