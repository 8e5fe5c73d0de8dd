// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! A multi-threaded runtime that supports running futures on it.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use snafu::{Backtrace, GenerateBacktrace, ResultExt, Snafu};
use tokio::{
    runtime::{Builder as RuntimeBuilder, Runtime as TokioRuntime},
    task::{JoinError, JoinHandle as TokioJoinHandle},
};

use crate::define_result;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build runtime, err:{}", source))]
    BuildRuntime {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to join task, err:{}.\nBacktrace:\n{}", source, backtrace))]
    JoinTask {
        source: JoinError,
        backtrace: Backtrace,
    },
}

define_result!(Error);

/// Handle to a spawned task, resolves to the task output once the task
/// finishes.
pub struct JoinHandle<T> {
    inner: TokioJoinHandle<T>,
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|res| {
            res.map_err(|source| Error::JoinTask {
                source,
                backtrace: Backtrace::generate(),
            })
        })
    }
}

/// A thin wrapper around the tokio multi-thread runtime.
pub struct Runtime {
    rt: TokioRuntime,
}

pub type RuntimeRef = Arc<Runtime>;

impl Runtime {
    /// Spawn a future and run it on this runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        JoinHandle {
            inner: self.rt.spawn(future),
        }
    }

    /// Run the blocking function on the blocking thread pool of this runtime.
    pub fn spawn_blocking<F, R>(&self, func: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        JoinHandle {
            inner: self.rt.spawn_blocking(func),
        }
    }

    /// Run a future to completion on the current thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.rt.block_on(future)
    }
}

/// Runtime builder.
pub struct Builder {
    thread_name: String,
    builder: RuntimeBuilder,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            thread_name: "runtime-worker".to_string(),
            builder: RuntimeBuilder::new_multi_thread(),
        }
    }
}

impl Builder {
    /// Set the name prefix of the worker threads.
    pub fn thread_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.thread_name = name.into();
        self
    }

    /// Set the number of worker threads.
    pub fn worker_threads(&mut self, num: usize) -> &mut Self {
        self.builder.worker_threads(num);
        self
    }

    /// Enable all tokio drivers (time, io).
    pub fn enable_all(&mut self) -> &mut Self {
        self.builder.enable_all();
        self
    }

    pub fn build(&mut self) -> Result<Runtime> {
        let rt = self
            .builder
            .thread_name(&self.thread_name)
            .build()
            .context(BuildRuntime)?;

        Ok(Runtime { rt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_runtime() -> Runtime {
        Builder::default()
            .thread_name("test")
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_spawn() {
        let rt = new_runtime();
        let out = rt.block_on(async {
            let handle = rt.spawn(async { 1 + 2 });
            handle.await.unwrap()
        });
        assert_eq!(3, out);
    }

    #[test]
    fn test_spawn_blocking() {
        let rt = new_runtime();
        let out = rt.block_on(async { rt.spawn_blocking(|| "blocking").await.unwrap() });
        assert_eq!("blocking", out);
    }
}
