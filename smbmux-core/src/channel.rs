use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use smbmux_domain::{NetworkInterface, TransportPtr};

// ---------------------------------------------------------------------------
// ChannelInfo
// ---------------------------------------------------------------------------

/// One physical connection belonging to a session.
///
/// Identity and endpoints are fixed at creation. Health and the counters
/// are atomics, updated by selection, release and the health check without
/// any lock.
pub struct ChannelInfo {
    // ---
    channel_id: String,
    local_address: IpAddr,
    remote_address: IpAddr,
    interface: NetworkInterface,

    /// `None` only for channels that never got a transport; such a
    /// channel turns unhealthy at its first health check and stays so.
    transport: Option<TransportPtr>,

    active_connections: AtomicU32,
    healthy: AtomicBool,
    created_at: Instant,

    /// Millis after `created_at` of the last health check.
    last_health_check_ms: AtomicU64,
    requests: AtomicU64,
    errors: AtomicU64,

    /// Set while the manager is re-establishing this channel.
    recovering: AtomicBool,
}

// ---

impl ChannelInfo {
    // ---
    pub fn new(
        channel_id: impl Into<String>,
        local_address: IpAddr,
        remote_address: IpAddr,
        interface: NetworkInterface,
        transport: Option<TransportPtr>,
    ) -> Self {
        // ---
        Self {
            channel_id: channel_id.into(),
            local_address,
            remote_address,
            interface,
            transport,
            active_connections: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            created_at: Instant::now(),
            last_health_check_ms: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            recovering: AtomicBool::new(false),
        }
    }

    // ---

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    pub fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }

    pub fn transport(&self) -> Option<&TransportPtr> {
        self.transport.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    /// Claim the recovery of this channel. False if someone already has.
    pub(crate) fn begin_recovery(&self) -> bool {
        !self.recovering.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_recovery(&self) {
        self.recovering.store(false, Ordering::Release);
    }

    // ---

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn increment_connections(&self) -> u32 {
        self.active_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement, saturating at zero.
    pub fn decrement_connections(&self) -> u32 {
        // ---
        let prev = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match prev {
            Ok(n) => n - 1,
            Err(_) => {
                tracing::warn!(channel = %self.channel_id, "release without matching select ignored");
                0
            }
        }
    }

    // ---

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record a health verdict. A channel without a transport stays unhealthy.
    pub fn set_healthy(&self, healthy: bool) {
        // ---
        let healthy = healthy && self.transport.is_some();
        let was = self.healthy.swap(healthy, Ordering::AcqRel);
        let since_created = (self.created_at.elapsed().as_millis() as u64).max(1);
        self.last_health_check_ms.store(since_created, Ordering::Release);

        if was != healthy {
            if healthy {
                tracing::info!(channel = %self.channel_id, "channel healthy again");
            } else {
                tracing::warn!(channel = %self.channel_id, remote = %self.remote_address, "channel unhealthy");
            }
        }
    }

    /// When the health flag was last written; `None` if never checked.
    pub fn last_health_check(&self) -> Option<Instant> {
        // ---
        match self.last_health_check_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(self.created_at + Duration::from_millis(ms)),
        }
    }

    // ---

    pub fn mark_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Errors per request, 0.0 before the first request.
    pub fn error_rate(&self) -> f64 {
        // ---
        match self.requests() {
            0 => 0.0,
            n => self.errors() as f64 / n as f64,
        }
    }
}

// ---

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(
            f,
            "Channel[{}: {} -> {}, active={}, healthy={}]",
            self.channel_id,
            self.local_address,
            self.remote_address,
            self.active_connections(),
            self.is_healthy()
        )
    }
}

impl fmt::Debug for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---
