use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

use smbmux_domain::{Result, SmbError};

use crate::audit::{AuditToken, HandleKind, LeakAuditor};
use crate::file_handle::FileHandle;
use crate::tree_handle::TreeHandle;

// ---------------------------------------------------------------------------
// PipeHandle
// ---------------------------------------------------------------------------

/// Named pipe on a tree, opened on first use.
///
/// If the underlying file handle goes stale (tree re-established) the next
/// operation re-opens it. Concurrent callers share a single open. Once
/// [`PipeHandle::close`] runs the pipe stays closed.
pub struct PipeHandle {
    // ---
    path: String,
    desired_access: u32,
    tree: Mutex<Option<TreeHandle>>,
    file: Mutex<Option<FileHandle>>,

    /// Held across the server round trip of an open.
    open_lock: AsyncMutex<()>,
    open: AtomicBool,
    auditor: Arc<LeakAuditor>,
    audit: Option<AuditToken>,
}

// ---

impl PipeHandle {
    // ---
    pub(crate) fn new(tree: TreeHandle, path: &str, desired_access: u32) -> Self {
        // ---
        let auditor = Arc::clone(tree.context().auditor());
        let audit = auditor.register(HandleKind::Pipe, &format!("{}{}", tree.share(), path));

        Self {
            path: path.to_string(),
            desired_access,
            tree: Mutex::new(Some(tree)),
            file: Mutex::new(None),
            open_lock: AsyncMutex::new(()),
            open: AtomicBool::new(true),
            auditor,
            audit,
        }
    }

    // ---

    fn tree_slot(&self) -> MutexGuard<'_, Option<TreeHandle>> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_slot(&self) -> MutexGuard<'_, Option<FileHandle>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_not_closed(&self) -> Result<()> {
        // ---
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SmbError::HandleClosed)
        }
    }

    // ---

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open and backed by a valid file handle.
    pub fn is_open(&self) -> bool {
        // ---
        self.open.load(Ordering::Acquire)
            && self.file_slot().as_ref().is_some_and(FileHandle::is_valid)
    }

    /// Was opened once, but the file handle no longer refers to a live open.
    pub fn is_stale(&self) -> bool {
        // ---
        self.open.load(Ordering::Acquire)
            && self.file_slot().as_ref().is_some_and(|f| !f.is_valid())
    }

    // ---

    /// A valid tree handle, re-bound to the tree's current id if the
    /// tree was re-established since this pipe was created.
    pub fn ensure_tree_connected(&self) -> Result<TreeHandle> {
        // ---
        self.ensure_not_closed()?;

        let mut slot = self.tree_slot();
        let current = slot.as_ref().ok_or(SmbError::HandleClosed)?;
        if current.is_valid() {
            return Ok(current.acquire());
        }
        if !current.is_connected() {
            return Err(SmbError::InvalidHandle);
        }

        let fresh = TreeHandle::new(Arc::clone(current.connection()), current.context());
        tracing::debug!(pipe = %self.path, tree_id = fresh.tree_id(), "re-bound pipe to new tree");
        let handed_out = fresh.acquire();
        let stale = slot.replace(fresh);
        drop(slot);
        drop(stale);

        Ok(handed_out)
    }

    // ---

    /// The open file handle behind the pipe, opening or re-opening it
    /// as needed.
    pub async fn ensure_open(&self) -> Result<FileHandle> {
        // ---
        self.ensure_not_closed()?;

        if let Some(file) = self.valid_file() {
            return Ok(file);
        }

        let _opening = self.open_lock.lock().await;
        self.ensure_not_closed()?;
        if let Some(file) = self.valid_file() {
            return Ok(file);
        }

        let tree = self.ensure_tree_connected()?;
        let fresh = tree.open_file(&self.path, self.desired_access).await?;
        let handed_out = fresh.acquire();

        let stale = self.file_slot().replace(fresh);
        if stale.is_some() {
            tracing::debug!(pipe = %self.path, "re-opened stale pipe");
        }
        drop(stale);

        // Lost a race with close: do not leave the new open behind.
        if self.ensure_not_closed().is_err() {
            let orphan = self.file_slot().take();
            drop(orphan);
            return Err(SmbError::HandleClosed);
        }

        Ok(handed_out)
    }

    fn valid_file(&self) -> Option<FileHandle> {
        self.file_slot().as_ref().filter(|f| f.is_valid()).map(FileHandle::acquire)
    }

    // ---

    /// Write `input` and read up to `max_output` reply bytes.
    pub async fn transact(&self, input: &[u8], max_output: usize) -> Result<Vec<u8>> {
        // ---
        let file = self.ensure_open().await?;
        let file_id = file.file_id()?;
        let tree = file.tree()?;

        let buffers = Arc::clone(tree.context().buffers());
        let mut buffer = buffers.checkout();
        let limit = max_output.min(buffer.len());

        let n = tree
            .connection()
            .transceive(&file_id, input, &mut buffer[..limit])
            .await?;
        Ok(buffer[..n].to_vec())
    }

    // ---

    /// Close the pipe and give back the tree.
    ///
    /// A valid file handle is closed on the server, a stale one is just
    /// released. Returns the first error; closing again is a no-op.
    pub async fn close(&self) -> Result<()> {
        // ---
        if !self.open.swap(false, Ordering::AcqRel) {
            tracing::trace!(pipe = %self.path, "already closed");
            return Ok(());
        }

        let file = self.file_slot().take();
        let mut first_err = None;
        if let Some(file) = file {
            if file.is_valid() {
                if let Err(e) = file.close(0).await {
                    tracing::debug!(pipe = %self.path, "pipe close failed: {e}");
                    first_err = Some(e);
                }
            } else {
                file.release();
            }
        }

        let tree = self.tree_slot().take();
        drop(tree);
        self.auditor.deregister(self.audit);
        tracing::debug!(pipe = %self.path, "pipe closed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---

impl Drop for PipeHandle {
    fn drop(&mut self) {
        // ---
        if self.open.load(Ordering::Acquire) {
            tracing::debug!(pipe = %self.path, "pipe dropped while open, releasing");
            self.auditor.deregister(self.audit);
        }
    }
}

impl fmt::Debug for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("PipeHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("stale", &self.is_stale())
            .finish()
    }
}

// ---

#[cfg(test)]
mod tests {
    // ---
    use smbmux_link_sim::SimTree;

    use super::*;
    use crate::config::MultiChannelConfig;
    use crate::context::HandleContext;

    fn ipc(sim: &Arc<SimTree>) -> TreeHandle {
        let ctx = HandleContext::new(&MultiChannelConfig::default()).unwrap();
        TreeHandle::new(sim.clone(), &ctx)
    }

    #[tokio::test]
    async fn pipe_opens_lazily_and_transacts() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\srvsvc", 0x0012_019F).unwrap();

        assert!(!pipe.is_open());
        assert_eq!(sim.open_calls(), 0);

        let reply = pipe.transact(b"bind", 64).await.unwrap();
        assert_eq!(reply, b"bind");
        assert!(pipe.is_open());

        pipe.transact(b"req", 64).await.unwrap();
        assert_eq!(sim.open_calls(), 1, "second transact reuses the open");
    }

    #[tokio::test]
    async fn stale_pipe_reopens_after_tree_reconnect() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\lsarpc", 0).unwrap();
        pipe.ensure_open().await.unwrap();

        sim.reconnect();
        assert!(pipe.is_stale());

        let reply = pipe.transact(b"again", 3).await.unwrap();
        assert_eq!(reply, b"aga");
        assert!(pipe.is_open());
        assert_eq!(sim.open_calls(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_the_tree() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\samr", 0).unwrap();
        pipe.ensure_open().await.unwrap();
        assert_eq!(tree.usage_count(), 3, "pipe and its file each hold the tree");

        pipe.close().await.unwrap();
        pipe.close().await.unwrap();

        assert_eq!(sim.close_calls(), 1);
        assert_eq!(tree.usage_count(), 1);
        assert!(matches!(pipe.ensure_open().await, Err(SmbError::HandleClosed)));
    }

    #[tokio::test]
    async fn close_reports_the_server_error() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\svcctl", 0).unwrap();
        pipe.ensure_open().await.unwrap();

        sim.set_fail_close(true);
        assert!(pipe.close().await.is_err());
        assert_eq!(tree.usage_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_transacts_share_one_open() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        sim.set_open_latency(std::time::Duration::from_millis(50));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\srvsvc", 0).unwrap();

        let (a, b, c) = tokio::join!(
            pipe.transact(b"one", 16),
            pipe.transact(b"two", 16),
            pipe.ensure_open(),
        );
        assert_eq!(a.unwrap(), b"one");
        assert_eq!(b.unwrap(), b"two");
        c.unwrap();

        assert_eq!(sim.open_calls(), 1);
        assert_eq!(sim.open_file_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reopens_after_reconnect_share_one_open() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\lsarpc", 0).unwrap();
        pipe.ensure_open().await.unwrap();

        sim.reconnect();
        sim.set_open_latency(std::time::Duration::from_millis(50));
        let (a, b) = tokio::join!(pipe.ensure_open(), pipe.ensure_open());

        assert_eq!(a.unwrap().file_id().unwrap(), b.unwrap().file_id().unwrap());
        assert_eq!(sim.open_calls(), 2);
        assert_eq!(sim.open_file_count(), 1);
    }

    #[tokio::test]
    async fn dead_tree_cannot_reopen() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\IPC$"));
        let tree = ipc(&sim);
        let pipe = tree.open_pipe("\\PIPE\\srvsvc", 0).unwrap();

        sim.drop_connection();
        assert!(matches!(pipe.ensure_open().await, Err(SmbError::InvalidHandle)));
    }
}
