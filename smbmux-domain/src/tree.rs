use async_trait::async_trait;

use super::error::Result;
use super::protocol::{FileId, OpenedFile};

// ---------------------------------------------------------------------------
// TreeConnection
// ---------------------------------------------------------------------------

/// A connected share on a server.
///
/// `tree_id` is the connection generation: it changes whenever the tree is
/// re-established, which invalidates every handle opened under the old one.
#[async_trait]
pub trait TreeConnection: Send + Sync {
    // ---
    fn tree_id(&self) -> u64;

    fn is_connected(&self) -> bool;

    fn is_smb2(&self) -> bool;

    /// UNC path of the share, e.g. `\\server\share`.
    fn share(&self) -> &str;

    /// CREATE `path` relative to the share with the given access mask.
    async fn open(&self, path: &str, desired_access: u32) -> Result<OpenedFile>;

    /// CLOSE an open file. `last_write_time` of 0 leaves the server's value.
    async fn close_file(&self, file_id: &FileId, last_write_time: u64) -> Result<()>;

    /// Send `input` and read the reply into `output`, returning the reply length.
    async fn transceive(&self, file_id: &FileId, input: &[u8], output: &mut [u8]) -> Result<usize>;

    async fn tree_disconnect(&self) -> Result<()>;
}
