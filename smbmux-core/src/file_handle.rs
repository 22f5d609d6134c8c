use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ---

use async_trait::async_trait;

// ---

use smbmux_domain::{FileId, OpenedFile, Result, SmbError, TreeConnection};

// ---

use crate::audit::{AuditToken, HandleKind, LeakAuditor};
use crate::tree_handle::TreeHandle;
use crate::usage::{close_once, release_on_drop, HandleLifecycle, UsageCount};

// ---------------------------------------------------------------------------
// FileInner
// ---------------------------------------------------------------------------

struct FileInner {
    // ---
    file_id: FileId,
    path: String,

    /// Share plus path, fixed at open.
    unc: String,
    desired_access: u32,
    initial_size: u64,

    /// Tree id the file was opened under.
    tree_id: u64,

    /// Our acquisition of the parent tree. Taken exactly once, at retire.
    tree: Mutex<Option<TreeHandle>>,
    usage: UsageCount,
    auditor: Arc<LeakAuditor>,
    audit: Option<AuditToken>,
}

// ---

impl FileInner {
    // ---
    fn tree_slot(&self) -> MutexGuard<'_, Option<TreeHandle>> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self) -> Option<Arc<dyn TreeConnection>> {
        self.tree_slot().as_ref().map(|t| Arc::clone(t.connection()))
    }
}

// ---

#[async_trait]
impl HandleLifecycle for FileInner {
    // ---
    fn usage(&self) -> &UsageCount {
        &self.usage
    }

    fn parent_is_current(&self) -> bool {
        // ---
        match self.connection() {
            Some(conn) => conn.is_connected() && conn.tree_id() == self.tree_id,
            None => false,
        }
    }

    async fn send_close(&self, last_write_time: u64) -> Result<()> {
        // ---
        match self.connection() {
            Some(conn) => conn.close_file(&self.file_id, last_write_time).await,
            None => Ok(()),
        }
    }

    fn retire(&self) {
        // ---
        let tree = self.tree_slot().take();
        drop(tree);
        self.auditor.deregister(self.audit);
        tracing::debug!(file = %self.describe(), "file handle closed");
    }

    fn describe(&self) -> String {
        format!("{} [fid {}]", self.path, self.file_id)
    }
}

// ---------------------------------------------------------------------------
// FileHandle
// ---------------------------------------------------------------------------

/// Reference-counted handle on an open file or pipe.
///
/// Holds an acquisition of its [`TreeHandle`] for as long as it is open.
/// Becomes invalid as soon as the tree is re-established under a new id
/// or disconnects; [`FileHandle::file_id`] then refuses to hand out the
/// stale id.
pub struct FileHandle {
    inner: Arc<FileInner>,
}

// ---

impl FileHandle {
    // ---
    pub(crate) fn new(tree: TreeHandle, path: &str, desired_access: u32, opened: OpenedFile) -> Self {
        // ---
        let tree_id = tree.connection().tree_id();
        let auditor = Arc::clone(tree.context().auditor());
        let unc = format!("{}{}", tree.share(), path);
        let audit = auditor.register(HandleKind::File, &format!("{unc} [fid {}]", opened.file_id));

        tracing::debug!(share = tree.share(), path, file_id = %opened.file_id, "file handle opened");
        Self {
            inner: Arc::new(FileInner {
                file_id: opened.file_id,
                path: path.to_string(),
                unc,
                desired_access,
                initial_size: opened.end_of_file,
                tree_id,
                tree: Mutex::new(Some(tree)),
                usage: UsageCount::new(),
                auditor,
                audit,
            }),
        }
    }

    // ---

    pub fn acquire(&self) -> FileHandle {
        // ---
        let n = self.inner.usage.acquire();
        tracing::trace!(file = %self.inner.describe(), usage = n, "acquired");
        FileHandle {
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

    /// The server's id for this open, while it still means something.
    pub fn file_id(&self) -> Result<FileId> {
        // ---
        if !self.is_valid() {
            return Err(SmbError::InvalidHandle);
        }
        Ok(self.inner.file_id)
    }

    /// Another acquisition of the parent tree.
    pub fn tree(&self) -> Result<TreeHandle> {
        // ---
        self.inner
            .tree_slot()
            .as_ref()
            .map(TreeHandle::acquire)
            .ok_or(SmbError::HandleClosed)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn unc(&self) -> &str {
        &self.inner.unc
    }

    pub fn desired_access(&self) -> u32 {
        self.inner.desired_access
    }

    /// File size reported when the file was opened.
    pub fn initial_size(&self) -> u64 {
        self.inner.initial_size
    }

    pub fn tree_id(&self) -> u64 {
        self.inner.tree_id
    }

    pub fn usage_count(&self) -> i64 {
        self.inner.usage.get()
    }

    // ---

    /// Close now, regardless of other holders, optionally stamping
    /// `last_write_time`. Later closes are no-ops.
    pub async fn close(self, last_write_time: u64) -> Result<()> {
        close_once(self.inner.as_ref(), last_write_time).await
    }
}

// ---

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        release_on_drop(&self.inner);
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("FileHandle")
            .field("path", &self.inner.path)
            .field("file_id", &self.inner.file_id)
            .field("usage", &self.usage_count())
            .field("valid", &self.is_valid())
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

    fn tree(sim: &Arc<SimTree>) -> TreeHandle {
        let ctx = HandleContext::new(&MultiChannelConfig::default()).unwrap();
        TreeHandle::new(sim.clone(), &ctx)
    }

    #[tokio::test]
    async fn file_holds_its_tree_until_closed() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\a.txt", 0x0012_0089).await.unwrap();

        assert_eq!(tree.usage_count(), 2, "open file must acquire its tree");
        assert!(file.file_id().is_ok());

        file.close(0).await.unwrap();
        assert_eq!(tree.usage_count(), 1, "close must release the tree");
        assert_eq!(sim.close_calls(), 1);
        assert_eq!(sim.open_file_count(), 0);
    }

    #[tokio::test]
    async fn close_runs_once_across_clones() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\b.txt", 0).await.unwrap();
        let copy = file.clone();
        assert_eq!(file.usage_count(), 2);

        file.close(0).await.unwrap();
        assert!(!copy.is_valid());
        assert!(matches!(copy.file_id(), Err(SmbError::InvalidHandle)));

        copy.close(0).await.unwrap();
        assert_eq!(sim.close_calls(), 1);
        assert_eq!(tree.usage_count(), 1);
    }

    #[tokio::test]
    async fn last_drop_closes_on_the_runtime() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\c.txt", 0).await.unwrap();
        let copy = file.acquire();

        drop(file);
        tokio::task::yield_now().await;
        assert_eq!(sim.close_calls(), 0, "one holder remains");

        copy.release();
        for _ in 0..10 {
            if sim.close_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sim.close_calls(), 1);
        assert_eq!(sim.open_file_count(), 0);
    }

    #[tokio::test]
    async fn tree_generation_change_invalidates_without_sending_close() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\d.txt", 0).await.unwrap();

        sim.reconnect();
        assert!(!file.is_valid());

        file.close(0).await.unwrap();
        assert_eq!(sim.close_calls(), 0, "stale handles must not send close");
        assert_eq!(tree.usage_count(), 1);
    }

    #[tokio::test]
    async fn parent_disconnect_invalidates() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\e.txt", 0).await.unwrap();

        sim.drop_connection();
        assert!(!file.is_valid());
        assert!(file.file_id().is_err());
    }

    #[tokio::test]
    async fn close_failure_propagates_and_still_releases_the_tree() {
        // ---
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = tree.open_file("\\f.txt", 0).await.unwrap();

        sim.set_fail_close(true);
        let err = file.close(0).await.unwrap_err();

        assert!(matches!(err, SmbError::Protocol { .. }));
        assert_eq!(tree.usage_count(), 1);
    }

    #[test]
    fn drop_without_runtime_releases_locally() {
        // ---
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let sim = Arc::new(SimTree::new("\\\\srv\\share"));
        let tree = tree(&sim);
        let file = rt.block_on(tree.open_file("\\g.txt", 0)).unwrap();
        drop(rt);

        drop(file);
        assert_eq!(tree.usage_count(), 1, "tree released even without a runtime");
        assert_eq!(sim.close_calls(), 0);
    }
}
