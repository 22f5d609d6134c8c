use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use async_trait::async_trait;
use uuid::Uuid;

// ---

use smbmux_domain::{
    // ---
    FileId,
    OpenedFile,
    Result,
    SmbError,
    TreeConnection,
};

// ---

const STATUS_OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
const STATUS_FILE_CLOSED: u32 = 0xC000_0128;
const STATUS_NETWORK_NAME_DELETED: u32 = 0xC000_00C9;

/// Paths beginning with this prefix fail to open.
pub const MISSING_PREFIX: &str = "missing";

// ---------------------------------------------------------------------------
// SimTree
// ---------------------------------------------------------------------------

/// In-process share. Pipes opened on it echo whatever is written to them.
///
/// `reconnect` bumps the tree id so tests can exercise handle staleness
/// without tearing anything down.
pub struct SimTree {
    // ---
    share: String,
    smb2: bool,
    tree_id: AtomicU64,
    connected: AtomicBool,

    /// Open files by id, with the path they were opened as.
    open_files: Mutex<HashMap<FileId, String>>,
    next_fid: AtomicU16,

    fail_close: AtomicBool,
    open_latency_ms: AtomicU64,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    tree_disconnect_calls: AtomicUsize,
}

// ---

impl SimTree {
    // ---
    pub fn new(share: impl Into<String>) -> Self {
        Self::with_dialect(share, true)
    }

    /// Share on an SMB1 server: 16-bit FIDs.
    pub fn smb1(share: impl Into<String>) -> Self {
        Self::with_dialect(share, false)
    }

    fn with_dialect(share: impl Into<String>, smb2: bool) -> Self {
        // ---
        Self {
            share: share.into(),
            smb2,
            tree_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            open_files: Mutex::new(HashMap::new()),
            next_fid: AtomicU16::new(0x4000),
            fail_close: AtomicBool::new(false),
            open_latency_ms: AtomicU64::new(0),
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            tree_disconnect_calls: AtomicUsize::new(0),
        }
    }

    // ---

    fn files(&self) -> MutexGuard<'_, HashMap<FileId, String>> {
        self.open_files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// Re-establish the tree under a new id. The server forgets every
    /// file opened under the previous one.
    pub fn reconnect(&self) -> u64 {
        // ---
        self.files().clear();
        self.connected.store(true, Ordering::SeqCst);
        self.tree_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the tree without telling anyone, as a dead session would.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// When true, every CLOSE fails with a protocol error.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Every CREATE takes this long to answer.
    pub fn set_open_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.open_latency_ms.store(ms, Ordering::SeqCst);
    }

    // ---

    pub fn is_open(&self, file_id: &FileId) -> bool {
        self.files().contains_key(file_id)
    }

    pub fn open_file_count(&self) -> usize {
        self.files().len()
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn tree_disconnect_calls(&self) -> usize {
        self.tree_disconnect_calls.load(Ordering::SeqCst)
    }

    // ---

    fn ensure_connected(&self) -> Result<()> {
        // ---
        if self.is_connected() {
            Ok(())
        } else {
            Err(SmbError::Protocol {
                status: STATUS_NETWORK_NAME_DELETED,
            })
        }
    }
}

// ---

#[async_trait]
impl TreeConnection for SimTree {
    // ---
    fn tree_id(&self) -> u64 {
        self.tree_id.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_smb2(&self) -> bool {
        self.smb2
    }

    fn share(&self) -> &str {
        &self.share
    }

    async fn open(&self, path: &str, desired_access: u32) -> Result<OpenedFile> {
        // ---
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.open_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.ensure_connected()?;

        if path.trim_start_matches('\\').starts_with(MISSING_PREFIX) {
            return Err(SmbError::Protocol {
                status: STATUS_OBJECT_NAME_NOT_FOUND,
            });
        }

        let file_id = if self.smb2 {
            FileId::new(Uuid::new_v4().into_bytes())
        } else {
            FileId::from_fid(self.next_fid.fetch_add(1, Ordering::SeqCst))
        };
        self.files().insert(file_id, path.to_string());

        tracing::trace!(share = %self.share, path, %file_id, desired_access, "sim open");
        Ok(OpenedFile {
            file_id,
            end_of_file: 0,
        })
    }

    async fn close_file(&self, file_id: &FileId, last_write_time: u64) -> Result<()> {
        // ---
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(SmbError::Protocol {
                status: STATUS_FILE_CLOSED,
            });
        }

        match self.files().remove(file_id) {
            Some(path) => {
                tracing::trace!(share = %self.share, path, %file_id, last_write_time, "sim close");
                Ok(())
            }
            None => Err(SmbError::Protocol {
                status: STATUS_FILE_CLOSED,
            }),
        }
    }

    async fn transceive(&self, file_id: &FileId, input: &[u8], output: &mut [u8]) -> Result<usize> {
        // ---
        self.ensure_connected()?;
        if !self.is_open(file_id) {
            return Err(SmbError::Protocol {
                status: STATUS_FILE_CLOSED,
            });
        }

        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        Ok(n)
    }

    async fn tree_disconnect(&self) -> Result<()> {
        // ---
        self.tree_disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.files().clear();
        Ok(())
    }
}

// ---
