//! Tracked background tasks for channel I/O.
//!
//! Every connect and disconnect the manager issues runs as a task spawned
//! through [`WorkerPool`], so shutdown can wait for them to drain and
//! cancel whatever is left after its deadline.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub(crate) struct WorkerPool {
    // ---
    active: AtomicUsize,
    idle: Notify,
    cancel_tx: watch::Sender<bool>,
}

// ---

/// Decrements the active count when a worker finishes, however it finishes.
struct ActiveGuard(Arc<WorkerPool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ---

impl WorkerPool {
    // ---
    pub(crate) fn new() -> Arc<Self> {
        // ---
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel_tx,
        })
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    // ---

    /// Run `fut` as a tracked task. Resolves to `None` if the pool was
    /// cancelled before `fut` finished.
    pub(crate) fn spawn<F>(self: &Arc<Self>, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // ---
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(Arc::clone(self));
        let mut cancel_rx = self.cancel_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            if *cancel_rx.borrow_and_update() {
                return None;
            }
            tokio::select! {
                out = fut => Some(out),
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
            }
        })
    }

    // ---

    /// Wait up to `timeout` for every tracked task to finish.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        // ---
        let wait_idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.active() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait_idle).await.is_ok()
    }

    /// Cancel every tracked task, running or not yet started.
    pub(crate) fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

// ---
