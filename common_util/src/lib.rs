// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Common utilities shared by the workspace.

pub mod codec;
#[macro_use]
pub mod macros;
pub mod runtime;
