// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Bytes utilities, re-export of [bytes_ext].

pub use bytes_ext::*;
