use std::fmt;
use std::sync::Arc;

// ---

use async_trait::async_trait;

// ---

use smbmux_domain::{Result, SmbError, TreeConnection};

// ---

use crate::audit::{AuditToken, HandleKind};
use crate::context::HandleContext;
use crate::file_handle::FileHandle;
use crate::pipe_handle::PipeHandle;
use crate::usage::{close_once, release_on_drop, HandleLifecycle, UsageCount};

// ---------------------------------------------------------------------------
// TreeInner
// ---------------------------------------------------------------------------

struct TreeInner {
    // ---
    conn: Arc<dyn TreeConnection>,

    /// Tree id at construction. A different id on `conn` means the tree was
    /// re-established and this handle belongs to the old one.
    tree_id: u64,
    usage: UsageCount,
    ctx: HandleContext,
    audit: Option<AuditToken>,
}

// ---

#[async_trait]
impl HandleLifecycle for TreeInner {
    // ---
    fn usage(&self) -> &UsageCount {
        &self.usage
    }

    fn parent_is_current(&self) -> bool {
        self.conn.is_connected() && self.conn.tree_id() == self.tree_id
    }

    async fn send_close(&self, _last_write_time: u64) -> Result<()> {
        self.conn.tree_disconnect().await
    }

    fn retire(&self) {
        // ---
        self.ctx.auditor().deregister(self.audit);
        tracing::debug!(tree = %self.describe(), "tree handle closed");
    }

    fn describe(&self) -> String {
        format!("{} [tid {}]", self.conn.share(), self.tree_id)
    }
}

// ---------------------------------------------------------------------------
// TreeHandle
// ---------------------------------------------------------------------------

/// Reference-counted handle on a connected share.
///
/// Each value is one usage unit: [`TreeHandle::acquire`] (or `clone`)
/// hands out another, dropping or [`TreeHandle::release`]-ing gives one
/// back. The last one out disconnects the tree if it is still the tree
/// this handle was issued for.
pub struct TreeHandle {
    inner: Arc<TreeInner>,
}

// ---

impl TreeHandle {
    // ---
    pub fn new(conn: Arc<dyn TreeConnection>, ctx: &HandleContext) -> Self {
        // ---
        let tree_id = conn.tree_id();
        let audit = ctx
            .auditor()
            .register(HandleKind::Tree, &format!("{} [tid {tree_id}]", conn.share()));

        tracing::debug!(share = conn.share(), tree_id, "tree handle opened");
        Self {
            inner: Arc::new(TreeInner {
                conn,
                tree_id,
                usage: UsageCount::new(),
                ctx: ctx.clone(),
                audit,
            }),
        }
    }

    // ---

    pub fn acquire(&self) -> TreeHandle {
        // ---
        let n = self.inner.usage.acquire();
        tracing::trace!(tree = %self.inner.describe(), usage = n, "acquired");
        TreeHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn release(self) {
        drop(self);
    }

    // ---

    pub fn is_valid(&self) -> bool {
        !self.inner.usage.is_closed() && self.inner.parent_is_current()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.is_connected()
    }

    /// Tree id this handle was issued under.
    pub fn tree_id(&self) -> u64 {
        self.inner.tree_id
    }

    pub fn share(&self) -> &str {
        self.inner.conn.share()
    }

    pub fn is_smb2(&self) -> bool {
        self.inner.conn.is_smb2()
    }

    pub fn usage_count(&self) -> i64 {
        self.inner.usage.get()
    }

    pub fn connection(&self) -> &Arc<dyn TreeConnection> {
        &self.inner.conn
    }

    pub fn context(&self) -> &HandleContext {
        &self.inner.ctx
    }

    // ---

    /// Open `path` on this tree. The returned handle holds its own
    /// acquisition of this tree until it closes.
    pub async fn open_file(&self, path: &str, desired_access: u32) -> Result<FileHandle> {
        // ---
        if !self.is_valid() {
            return Err(SmbError::InvalidHandle);
        }

        let opened = self.inner.conn.open(path, desired_access).await?;
        Ok(FileHandle::new(self.acquire(), path, desired_access, opened))
    }

    /// Pipe on this tree; the pipe itself is opened lazily.
    pub fn open_pipe(&self, path: &str, desired_access: u32) -> Result<PipeHandle> {
        // ---
        if !self.is_valid() {
            return Err(SmbError::InvalidHandle);
        }
        Ok(PipeHandle::new(self.acquire(), path, desired_access))
    }

    // ---

    /// Close now, regardless of other holders. Later closes are no-ops.
    pub async fn close(self) -> Result<()> {
        close_once(self.inner.as_ref(), 0).await
    }
}

// ---

impl Clone for TreeHandle {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl Drop for TreeHandle {
    fn drop(&mut self) {
        release_on_drop(&self.inner);
    }
}

impl fmt::Debug for TreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("TreeHandle")
            .field("share", &self.share())
            .field("tree_id", &self.inner.tree_id)
            .field("usage", &self.usage_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}

// ---
