// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! In-memory meta client, for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use common_types::{schema::TableInfo, table::TableId};

use crate::{AllocatorBusy, MetaClient, Result, TableNotFound};

/// Meta client backed by process memory.
///
/// Tables are registered up front; the id cursor of every table starts at 1.
/// A number of artificial busy responses can be injected to exercise the
/// allocator retry path.
#[derive(Default)]
pub struct MemMetaClient {
    tables: Mutex<HashMap<(String, String), TableInfo>>,
    id_cursors: Mutex<HashMap<TableId, i64>>,
    busy_left: AtomicUsize,
}

impl MemMetaClient {
    pub fn register_table(&self, database: &str, table_info: TableInfo) {
        let mut tables = self.tables.lock().unwrap();
        tables.insert(
            (database.to_string(), table_info.name.clone()),
            table_info,
        );
    }

    /// Simulate a schema change by advancing the table's update timestamp.
    pub fn bump_update_timestamp(&self, database: &str, table: &str) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(info) = tables.get_mut(&(database.to_string(), table.to_string())) {
            info.update_timestamp += 1;
        }
    }

    /// The next `count` allocations observe a busy allocator.
    pub fn inject_busy(&self, count: usize) {
        self.busy_left.store(count, Ordering::Relaxed);
    }
}

#[async_trait]
impl MetaClient for MemMetaClient {
    async fn table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let tables = self.tables.lock().unwrap();
        match tables.get(&(database.to_string(), table.to_string())) {
            Some(info) => Ok(info.clone()),
            None => TableNotFound { database, table }.fail(),
        }
    }

    async fn alloc_auto_id(
        &self,
        _db_id: i64,
        table_id: TableId,
        step: u64,
        _unsigned: bool,
    ) -> Result<i64> {
        loop {
            let left = self.busy_left.load(Ordering::Relaxed);
            if left == 0 {
                break;
            }
            if self
                .busy_left
                .compare_exchange(left, left - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return AllocatorBusy { table_id }.fail();
            }
        }

        let mut cursors = self.id_cursors.lock().unwrap();
        let cursor = cursors.entry(table_id).or_insert(1);
        let base = *cursor;
        *cursor += step as i64;
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use common_types::datum::DatumKind;
    use common_types::schema::ColumnSchema;

    use super::*;

    fn table_info(name: &str) -> TableInfo {
        TableInfo {
            id: 7,
            db_id: 1,
            name: name.to_string(),
            update_timestamp: 100,
            pk_is_handle: false,
            handle_offset: None,
            columns: vec![ColumnSchema {
                id: 1,
                name: "a".to_string(),
                offset: 0,
                kind: DatumKind::Int,
                nullable: false,
                auto_increment: false,
            }],
            indices: Vec::new(),
            partitioned: false,
            has_generated_columns: false,
        }
    }

    #[tokio::test]
    async fn test_register_and_fetch() {
        let meta = MemMetaClient::default();
        meta.register_table("db", table_info("t"));

        let info = meta.table_info("db", "t").await.unwrap();
        assert_eq!(100, info.update_timestamp);

        meta.bump_update_timestamp("db", "t");
        let info = meta.table_info("db", "t").await.unwrap();
        assert_eq!(101, info.update_timestamp);

        assert!(meta.table_info("db", "missing").await.is_err());
    }
}
