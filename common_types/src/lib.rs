// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Common types of the write pipeline.

pub mod bytes;
pub mod datum;
pub mod row;
pub mod schema;
pub mod table;

/// Timestamp vended by the placement driver's timestamp oracle.
pub type TsoTimestamp = u64;

pub const MIN_TSO_TIMESTAMP: TsoTimestamp = 0;
pub const MAX_TSO_TIMESTAMP: TsoTimestamp = u64::MAX;
