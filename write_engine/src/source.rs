// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Input contract of the write engine.
//!
//! The upstream compute substrate hands the engine a partitioned, lazily
//! materialized stream of records with named fields. Field names are matched
//! against the table's columns case-insensitively.

use std::sync::Arc;

use common_types::datum::Datum;

/// One record of the source, values in source field order.
pub type SourceRow = Vec<Datum>;

/// A partitioned row stream.
///
/// A partition may be iterated more than once; every call to [partition]
/// starts a fresh pass over the same records in the same order. Partition
/// order plus in-partition order defines the input order the engine relies on
/// for deterministic handle assignment and deduplication.
///
/// [partition]: RowSource::partition
pub trait RowSource: Send + Sync {
    fn field_names(&self) -> Vec<String>;

    fn num_partitions(&self) -> usize;

    fn partition(&self, index: usize) -> Box<dyn Iterator<Item = SourceRow> + Send + '_>;
}

pub type RowSourceRef = Arc<dyn RowSource>;

/// Row source backed by process memory.
pub struct MemSource {
    fields: Vec<String>,
    partitions: Vec<Vec<SourceRow>>,
}

impl MemSource {
    pub fn new(fields: Vec<&str>, partitions: Vec<Vec<SourceRow>>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| f.to_string()).collect(),
            partitions,
        }
    }

    /// Single-partition source.
    pub fn single(fields: Vec<&str>, rows: Vec<SourceRow>) -> Self {
        Self::new(fields, vec![rows])
    }
}

impl RowSource for MemSource {
    fn field_names(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn partition(&self, index: usize) -> Box<dyn Iterator<Item = SourceRow> + Send + '_> {
        Box::new(self.partitions[index].iter().cloned())
    }
}
