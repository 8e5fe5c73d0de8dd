// Copyright 2026 Batchwrite Project Authors. Licensed under Apache-2.0.

//! Bounded exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Total backoff budget of a batch prewrite call.
pub const BATCH_PREWRITE_BACKOFF_MS: u64 = 20_000;

const DEFAULT_BASE_MS: u64 = 50;
const DEFAULT_CAP_MS: u64 = 3_000;

/// Retry pacing for one RPC: each [Backoff::sleep] waits a jittered,
/// exponentially growing delay and deducts it from the total budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: u64,
    cap_ms: u64,
    budget_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64, budget_ms: u64) -> Self {
        Self {
            next_ms: base_ms,
            cap_ms,
            budget_ms,
        }
    }

    /// Backoff with default pacing and the given total budget.
    pub fn with_budget_ms(budget_ms: u64) -> Self {
        Self::new(DEFAULT_BASE_MS, DEFAULT_CAP_MS, budget_ms)
    }

    /// Sleep for the next delay. Returns false once the budget is exhausted,
    /// in which case no sleep happens and the caller should give up.
    pub async fn sleep(&mut self) -> bool {
        if self.budget_ms == 0 {
            return false;
        }

        let jitter = rand::thread_rng().gen_range(0, self.next_ms / 2 + 1);
        let delay = (self.next_ms + jitter).min(self.budget_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.budget_ms -= delay;
        self.next_ms = (self.next_ms * 2).min(self.cap_ms);
        true
    }

    #[inline]
    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }
}
