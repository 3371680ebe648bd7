// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable cancellation handle shared between the front-end, the agent
/// loop, and the active tool handler.
///
/// The orchestrator polls `is_cancelled` between state transitions; tool
/// handlers that run long operations should await `cancelled()` in a select.
/// A handler that ignores the token is abandoned by the executor when its
/// timeout expires.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.  Idempotent; wakes every waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the token for a new turn.  Clones held by the front-end stay
    /// valid across turns.
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        // Register interest before the flag check so a cancel between the
        // check and the await cannot be missed.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
