use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// ChannelStatistics
// ---------------------------------------------------------------------------

/// Point-in-time summary of a [`crate::MultiChannelManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatistics {
    // ---
    /// Sessions that currently own a channel group.
    pub active_sessions: usize,

    /// Channels across all current groups.
    pub total_channels: usize,

    /// Channels currently marked healthy.
    pub healthy_channels: usize,

    /// Successful selections since the manager started.
    pub total_requests: u64,

    /// Channels ever created, including ones since torn down.
    pub total_channels_created: u64,
}

// ---

impl fmt::Display for ChannelStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(
            f,
            "ChannelStats[sessions={}, channels={}, healthy={}, requests={}, created={}]",
            self.active_sessions,
            self.total_channels,
            self.healthy_channels,
            self.total_requests,
            self.total_channels_created
        )
    }
}
