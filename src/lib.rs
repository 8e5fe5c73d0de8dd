// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Batchwrite, a distributed batch-write coordinator for sharded
//! transactional kv stores.
//!
//! The facade re-exports the public surface of the workspace; the actual
//! pipeline lives in [write_engine].

pub use common_types::{
    datum::{Datum, DatumKind},
    schema::{ColumnSchema, IndexSchema, TableInfo},
    table::{Handle, TableId, TableIdent},
};
pub use kv_client::{PdClient, PdClientRef, SqlChannel, SqlChannelRef, TxnClient, TxnKv};
pub use meta_client::{MetaClient, MetaClientRef};
pub use write_engine::{
    MemSource, RowSource, RowSourceRef, SourceRow, WriteEngine, WriteOptions, WriteReport,
};
