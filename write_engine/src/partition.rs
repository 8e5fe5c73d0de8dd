// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Routing of kv pairs to worker partitions by owning region.

use std::collections::HashSet;

use common_util::define_result;
use kv_client::{Mutation, RegionInfo};
use snafu::{ensure, Backtrace, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Region list is empty.\nBacktrace:\n{}", backtrace))]
    EmptyRegions { backtrace: Backtrace },
}

define_result!(Error);

/// Routes keys to worker partitions.
///
/// Regions are kept sorted by end key (an empty end key is unbounded and
/// sorts last); a key belongs to the first region whose end key is greater
/// than it. The partition of a region is `region_index % concurrency`, or the
/// region index itself when the write concurrency is unlimited, so kv pairs
/// of one region always land in one partition.
#[derive(Debug)]
pub struct RegionPartitioner {
    regions: Vec<RegionInfo>,
    num_partitions: usize,
}

impl RegionPartitioner {
    pub fn try_new(mut regions: Vec<RegionInfo>, write_concurrency: i64) -> Result<Self> {
        ensure!(!regions.is_empty(), EmptyRegions);

        regions.sort_by(|a, b| match (a.end_key.is_empty(), b.end_key.is_empty()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.end_key.cmp(&b.end_key),
        });

        let num_partitions = if write_concurrency <= 0 {
            regions.len()
        } else {
            (write_concurrency as usize).min(regions.len())
        };

        Ok(Self {
            regions,
            num_partitions,
        })
    }

    #[inline]
    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Index of the region owning `key`.
    pub fn region_index(&self, key: &[u8]) -> usize {
        let index = self
            .regions
            .partition_point(|r| !r.end_key.is_empty() && r.end_key.as_slice() <= key);
        index.min(self.regions.len() - 1)
    }

    #[inline]
    pub fn region(&self, index: usize) -> &RegionInfo {
        &self.regions[index]
    }

    /// Split kv pairs into worker partitions.
    ///
    /// Duplicate keys should not survive deduplication and merging, but a
    /// keep-first reduce runs anyway so a duplicate never reaches the store.
    pub fn partition(&self, kvs: Vec<Mutation>) -> Vec<Vec<Mutation>> {
        let mut partitions = vec![Vec::new(); self.num_partitions];
        let mut seen = HashSet::with_capacity(kvs.len());
        for kv in kvs {
            if !seen.insert(kv.key.clone()) {
                continue;
            }
            let partition = self.region_index(&kv.key) % self.num_partitions;
            partitions[partition].push(kv);
        }
        partitions
    }
}
