//! Synthetic traffic for the demo: channel selections per session and one
//! pass over the tree/file/pipe handle chain.

use std::sync::Arc;

// ---

use tokio::task::JoinSet;
use tracing::{info, warn};

// ---

use smbmux_core::{HandleContext, MultiChannelConfig, MultiChannelManager, TreeHandle};
use smbmux_domain::SmbError;
use smbmux_link_sim::SimTree;

// ---

const GENERIC_READ_WRITE: u32 = 0xC000_0000;

// ---------------------------------------------------------------------------
// Channel selections
// ---------------------------------------------------------------------------

/// Issue `per_session` leased selections on every session concurrently.
/// Returns how many were served.
pub async fn drive_requests(
    manager: Arc<MultiChannelManager>,
    session_ids: &[String],
    per_session: usize,
) -> usize {
    // ---
    let mut tasks = JoinSet::new();
    for session_id in session_ids {
        let manager = Arc::clone(&manager);
        let session_id = session_id.clone();

        tasks.spawn(async move {
            let mut served = 0;
            for _ in 0..per_session {
                let Some(lease) = manager.acquire_channel(&session_id) else {
                    warn!(session = %session_id, served, "no channel available, stopping");
                    break;
                };
                tracing::trace!(session = %session_id, channel = lease.channel_id(), "request");
                tokio::task::yield_now().await;
                drop(lease);
                served += 1;
            }
            served
        });
    }

    let mut total = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(served) => total += served,
            Err(e) => warn!("request task failed: {e}"),
        }
    }
    total
}

// ---------------------------------------------------------------------------
// Failover
// ---------------------------------------------------------------------------

/// Report the primary channel of `session_id` as failed and let the
/// manager re-establish it.
pub async fn exercise_failover(manager: &MultiChannelManager, session_id: &str) {
    // ---
    let Some(channel) = manager.group(session_id).and_then(|g| g.primary()) else {
        warn!(session = %session_id, "no primary channel to fail over");
        return;
    };

    let reset = SmbError::Transport("simulated connection reset".into());
    match manager.handle_channel_failure(&channel, &reset).await {
        Ok(replacement) => info!(session = %session_id, channel = %replacement, "primary channel recovered"),
        Err(e) => warn!(session = %session_id, "primary channel not recovered: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Handle chain
// ---------------------------------------------------------------------------

/// Open a tree, a file and a pipe on a simulated share, survive one tree
/// reconnect, then close everything and report leaks.
pub async fn exercise_handles(cfg: &MultiChannelConfig) -> anyhow::Result<()> {
    // ---
    let ctx = HandleContext::new(cfg)?;
    let share = Arc::new(SimTree::new("\\\\sim\\IPC$"));
    let tree = TreeHandle::new(share.clone(), &ctx);

    let file = tree.open_file("\\reports\\daily.csv", GENERIC_READ_WRITE).await?;
    info!(path = file.path(), file_id = %file.file_id()?, "file opened");

    let pipe = tree.open_pipe("\\pipe\\srvsvc", GENERIC_READ_WRITE)?;
    let reply = pipe.transact(b"NetShareEnum", 256).await?;
    info!(bytes = reply.len(), "pipe transact");

    let tree_id = share.reconnect();
    info!(tree_id, stale = pipe.is_stale(), file_valid = file.is_valid(), "tree re-established");

    let reply = pipe.transact(b"NetShareEnum", 256).await?;
    info!(bytes = reply.len(), "pipe transact after reopen");

    pipe.close().await?;
    file.close(0).await?;
    tree.close().await?;

    let leaks = ctx.auditor().log_leaks();
    info!(leaks, pooled_buffers = ctx.buffers().pooled(), "handle chain closed");
    Ok(())
}
