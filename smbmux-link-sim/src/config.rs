use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use smbmux_domain::{Capabilities, Dialect};

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the simulated SMB server.
///
/// Defaults to a healthy SMB 3.1.1 server advertising multi-channel, with
/// no latency and no injected faults.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Dialect every connection negotiates.
    pub dialect: Dialect,

    /// Capability bits every connection advertises.
    pub capabilities: Capabilities,

    /// Delay before `connect` resolves.
    pub connect_latency: Duration,

    /// Delay before `echo` resolves.
    pub echo_latency: Duration,

    /// Remote addresses whose connect attempts are refused.
    pub refused_remotes: HashSet<IpAddr>,
    /// Remote addresses whose transports fail to disconnect cleanly.
    pub failing_disconnects: HashSet<IpAddr>,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            dialect: Dialect::Smb311,
            capabilities: Capabilities::LEASING
                | Capabilities::LARGE_MTU
                | Capabilities::MULTI_CHANNEL,
            connect_latency: Duration::ZERO,
            echo_latency: Duration::ZERO,
            refused_remotes: HashSet::new(),
            failing_disconnects: HashSet::new(),
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Healthy multi-channel capable SMB 3.1.1 server. Useful as a baseline.
    pub fn smb311() -> Self {
        Self::default()
    }

    // ---

    /// SMB 2.1 server: negotiates SMB2 but cannot do multi-channel.
    pub fn smb21() -> Self {
        // ---
        Self {
            dialect: Dialect::Smb210,
            capabilities: Capabilities::LEASING | Capabilities::LARGE_MTU,
            ..Default::default()
        }
    }

    // ---

    /// Legacy SMB1-only server.
    pub fn smb1() -> Self {
        // ---
        Self {
            dialect: Dialect::Smb1,
            capabilities: Capabilities::empty(),
            ..Default::default()
        }
    }

    // ---

    pub fn refuse(mut self, remote: IpAddr) -> Self {
        self.refused_remotes.insert(remote);
        self
    }

    pub fn fail_disconnect(mut self, remote: IpAddr) -> Self {
        self.failing_disconnects.insert(remote);
        self
    }

    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    pub fn with_echo_latency(mut self, latency: Duration) -> Self {
        self.echo_latency = latency;
        self
    }
}
