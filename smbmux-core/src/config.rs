use std::time::Duration;

use serde::{Deserialize, Serialize};

use smbmux_domain::{LoadBalancingStrategy, Result, RetryPolicy, SmbError};

// ---

/// Largest buffer the cache will hand out.
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Standard SMB port.
pub const SMB_PORT: u16 = 445;

// ---------------------------------------------------------------------------
// MultiChannelConfig
// ---------------------------------------------------------------------------

/// Tunables for [`crate::MultiChannelManager`] and the handle layer.
///
/// Missing fields in a TOML file fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiChannelConfig {
    // ---
    /// Upper bound on channels per session.
    pub max_channels: usize,

    pub strategy: LoadBalancingStrategy,

    /// Period of the background health check. 0 disables it.
    pub health_check_interval_ms: u64,

    /// A probe that takes longer than this counts as a failure.
    pub health_probe_timeout_ms: u64,

    pub signing_enforced: bool,

    /// Remote port every channel connects to.
    pub port: u16,

    /// Skip unhealthy channels during selection while a healthy one exists.
    pub skip_unhealthy: bool,

    /// How long `shutdown` waits for background work before cancelling it.
    pub shutdown_timeout_ms: u64,

    pub buffer_size: usize,
    pub buffer_cache_capacity: usize,

    /// Record a backtrace for every handle so leaks can be traced to
    /// where the handle was created.
    pub trace_resource_usage: bool,

    /// Reconnect attempts for a failed channel before it is removed.
    pub failover_max_attempts: u32,

    /// Backoff after the first failed reconnect; doubles up to the max.
    pub failover_initial_delay_ms: u64,
    pub failover_max_delay_ms: u64,
}

// ---

impl Default for MultiChannelConfig {
    fn default() -> Self {
        // ---
        Self {
            max_channels: 4,
            strategy: LoadBalancingStrategy::RoundRobin,
            health_check_interval_ms: 30_000,
            health_probe_timeout_ms: 5_000,
            signing_enforced: false,
            port: SMB_PORT,
            skip_unhealthy: true,
            shutdown_timeout_ms: 5_000,
            buffer_size: 0xFFFF,
            buffer_cache_capacity: 16,
            trace_resource_usage: false,
            failover_max_attempts: 3,
            failover_initial_delay_ms: 1_000,
            failover_max_delay_ms: 30_000,
        }
    }
}

// ---

impl MultiChannelConfig {
    // ---
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.max_channels == 0 {
            return Err(SmbError::InvalidArgument("max_channels must be at least 1".into()));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(SmbError::InvalidArgument(format!(
                "buffer_size must be between 1 and {MAX_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }
        if self.buffer_cache_capacity == 0 {
            return Err(SmbError::InvalidArgument(
                "buffer_cache_capacity must be at least 1".into(),
            ));
        }
        self.failover_policy()?;
        Ok(())
    }

    // ---

    /// `None` when periodic health checking is disabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_ms > 0).then(|| Duration::from_millis(self.health_check_interval_ms))
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Backoff between reconnect attempts of a failed channel.
    pub fn failover_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.failover_max_attempts,
            self.failover_initial_delay_ms,
            self.failover_max_delay_ms,
            2.0,
            true,
        )
    }
}

// ---
