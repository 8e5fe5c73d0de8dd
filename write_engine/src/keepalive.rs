// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Keep-alive of the primary lock.

use std::{sync::Arc, time::Duration};

use common_types::TsoTimestamp;
use common_util::runtime::RuntimeRef;
use kv_client::{TxnClient, TxnKv};
use log::warn;
use tokio::sync::Notify;

/// Heartbeats fire this many times per ttl window.
const REFRESHES_PER_TTL: u64 = 3;
/// Floor of the heartbeat period.
const MIN_REFRESH_PERIOD_MS: u64 = 100;

/// Background task pinging the primary lock before its ttl expires.
///
/// Lives from primary prewrite until primary commit (or abort); [stop] is the
/// single cancellation point. A failed heartbeat is only logged: if the lock
/// is really gone the commit of the primary key will fail on its own.
///
/// [stop]: TtlKeeper::stop
pub struct TtlKeeper {
    shutdown: Arc<Notify>,
    handle: common_util::runtime::JoinHandle<()>,
}

impl TtlKeeper {
    pub fn start<T: TxnKv>(
        runtime: &RuntimeRef,
        store: T,
        primary_key: Vec<u8>,
        start_ts: TsoTimestamp,
        ttl_ms: u64,
    ) -> TtlKeeper {
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = shutdown.clone();

        let handle = runtime.spawn(async move {
            let period =
                Duration::from_millis((ttl_ms / REFRESHES_PER_TTL).max(MIN_REFRESH_PERIOD_MS));
            let mut client = match store.new_client() {
                Ok(client) => client,
                Err(e) => {
                    warn!(
                        "Ttl keeper failed to open a client, start_ts:{}, err:{}",
                        start_ts, e
                    );
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown_task.notified() => break,
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = client.txn_heartbeat(&primary_key, start_ts, ttl_ms).await {
                            warn!(
                                "Failed to refresh primary lock ttl, start_ts:{}, err:{}",
                                start_ts, e
                            );
                        }
                    }
                }
            }

            if let Err(e) = client.close().await {
                warn!("Ttl keeper failed to close its client, err:{}", e);
            }
        });

        TtlKeeper { shutdown, handle }
    }

    /// Cancel the keeper and wait for it to wind down.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            warn!("Failed to join ttl keeper task, err:{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use common_util::runtime;
    use kv_client::{mem::MemStore, Backoff, Mutation, TxnKv};

    use super::*;

    #[tokio::test]
    async fn test_keeper_refreshes_ttl() {
        let store = MemStore::new();
        let mut client = store.new_client().unwrap();
        client
            .prewrite_primary(
                Backoff::with_budget_ms(0),
                Mutation::put(b"p".to_vec(), b"v".to_vec()),
                10,
                9_000,
            )
            .await
            .unwrap();
        assert_eq!(Some(9_000), store.lock_ttl_ms(b"p"));

        let rt = Arc::new(
            runtime::Builder::default()
                .thread_name("keeper-test")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap(),
        );
        // Refresh period bottoms out at 100ms.
        let keeper = TtlKeeper::start(&rt, store.clone(), b"p".to_vec(), 10, 300);
        tokio::time::sleep(Duration::from_millis(350)).await;
        keeper.stop().await;

        // The heartbeat rewrote the ttl recorded on the lock.
        assert_eq!(Some(300), store.lock_ttl_ms(b"p"));

        tokio::task::spawn_blocking(move || drop(rt)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let store = MemStore::new();
        let rt = Arc::new(
            runtime::Builder::default()
                .thread_name("keeper-test")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap(),
        );
        let keeper = TtlKeeper::start(&rt, store, b"p".to_vec(), 10, 60_000);
        // No lock exists; stopping immediately must not hang or error.
        keeper.stop().await;

        tokio::task::spawn_blocking(move || drop(rt)).await.unwrap();
    }
}
