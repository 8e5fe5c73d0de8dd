// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Distributed batch-write engine.
//!
//! One [writer::WriteEngine::write] call ingests a partitioned row source and
//! commits it into the sharded transactional store as exactly one
//! percolator-style transaction:
//!
//! ```text
//! source rows -> normalize -> assign handles -> dedup -> resolve conflicts
//!            -> expand to kv -> merge put-over-delete -> route by region
//!            -> prewrite primary -> prewrite secondaries -> commit primary
//!            -> commit secondaries (best effort)
//! ```
//!
//! Everything above [kv_encoder] treats keys and values as opaque bytes; the
//! encoder is the single place that knows the store's on-disk format.

pub mod conflict;
pub mod dedup;
pub mod expand;
pub mod keepalive;
pub mod kv_encoder;
pub mod normalize;
pub mod options;
pub mod partition;
pub mod source;
pub mod split;
pub mod writer;

pub use options::WriteOptions;
pub use source::{MemSource, RowSource, RowSourceRef, SourceRow};
pub use writer::{WriteEngine, WriteReport};
