//! Cooperative cancellation for running jobs.
//!
//! Cancellation is idempotent - only the first reason is kept. The token
//! is observed by the runner at its suspension points (backoff sleeps,
//! stage invocations); dropping an in-flight stage future terminates any
//! spawned subprocess.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    signal: watch::Sender<bool>,
}

/// A cloneable token for cooperative cancellation of a single job run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                reason: RwLock::new(None),
                signal,
            }),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// Idempotent - the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .shared
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.shared.reason.write() = Some(reason.into());
            let _ = self.shared.signal.send(true);
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.shared.reason.read().clone()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.shared.signal.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as this token; unreachable in practice.
                return;
            }
        }
    }
}
