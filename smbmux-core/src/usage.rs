//! Usage counting and the shared close sequence for resource handles.
//!
//! Every handle starts with a usage count of 1. Acquire adds one, release
//! subtracts one, and the release that reaches zero closes the handle.
//! Closing is a one-shot transition guarded by a separate flag so an
//! explicit close racing the last release still closes exactly once.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use smbmux_domain::Result;

// ---------------------------------------------------------------------------
// UsageCount
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    // ---
    /// Other users remain.
    Remaining(i64),

    /// This release dropped the count to zero.
    Last,

    /// The count was already zero; nothing changed.
    Underflow,
}

// ---

#[derive(Debug)]
pub(crate) struct UsageCount {
    // ---
    count: AtomicI64,
    closed: AtomicBool,
}

// ---

impl UsageCount {
    // ---
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> i64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement, never below zero.
    pub(crate) fn release(&self) -> Released {
        // ---
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 0).then(|| n - 1));

        match prev {
            Ok(1) => Released::Last,
            Ok(n) => Released::Remaining(n - 1),
            Err(_) => Released::Underflow,
        }
    }

    /// True for exactly one caller over the lifetime of the count.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// HandleLifecycle
// ---------------------------------------------------------------------------

/// The parts of a handle the shared close sequence needs.
#[async_trait]
pub(crate) trait HandleLifecycle: Send + Sync + 'static {
    // ---
    fn usage(&self) -> &UsageCount;

    /// Whether the parent that issued this handle is still the one it
    /// was issued under. A close request is only sent when it is.
    fn parent_is_current(&self) -> bool;

    /// Send the protocol close request.
    async fn send_close(&self, last_write_time: u64) -> Result<()>;

    /// Drop parent references and audit registration. Runs once.
    fn retire(&self);

    fn describe(&self) -> String;
}

// ---

/// Close `handle` if nobody has yet.
///
/// The close request goes out only while the parent is current; the handle
/// is retired regardless and the request's error, if any, is returned.
pub(crate) async fn close_once<H>(handle: &H, last_write_time: u64) -> Result<()>
where
    H: HandleLifecycle + ?Sized,
{
    // ---
    if !handle.usage().begin_close() {
        tracing::trace!(handle = %handle.describe(), "already closed");
        return Ok(());
    }

    let result = if handle.parent_is_current() {
        handle.send_close(last_write_time).await
    } else {
        tracing::debug!(handle = %handle.describe(), "parent gone, closing locally");
        Ok(())
    };

    handle.retire();
    result
}

// ---

/// Close after the last release, from a context that cannot await.
///
/// With a tokio runtime the close runs as a spawned task and a failure is
/// logged. Without one the handle is retired locally and the server is not
/// told.
pub(crate) fn close_detached<H: HandleLifecycle>(handle: Arc<H>) {
    // ---
    if !handle.parent_is_current() {
        if handle.usage().begin_close() {
            tracing::debug!(handle = %handle.describe(), "parent gone, closing locally");
            handle.retire();
        }
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn(async move {
                if let Err(e) = close_once(handle.as_ref(), 0).await {
                    tracing::warn!(handle = %handle.describe(), "implicit close failed: {e}");
                }
            });
        }
        Err(_) => {
            if handle.usage().begin_close() {
                tracing::warn!(
                    handle = %handle.describe(),
                    "no async runtime, released without notifying the server"
                );
                handle.retire();
            }
        }
    }
}

// ---

/// Common `Drop` body: one release, closing on the last.
pub(crate) fn release_on_drop<H: HandleLifecycle>(handle: &Arc<H>) {
    // ---
    match handle.usage().release() {
        Released::Last => close_detached(Arc::clone(handle)),
        Released::Remaining(n) => {
            tracing::trace!(handle = %handle.describe(), remaining = n, "released");
        }
        Released::Underflow => {
            tracing::warn!(handle = %handle.describe(), "release below zero ignored");
        }
    }
}

// ---
