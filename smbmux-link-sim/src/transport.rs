use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---

use async_trait::async_trait;

// ---

use smbmux_domain::{
    // ---
    Capabilities,
    Dialect,
    Result,
    SmbError,
    SmbTransport,
    TransportConnector,
    TransportPtr,
};

// ---

use super::config::SimConfig;

// ---------------------------------------------------------------------------
// SimTransport
// ---------------------------------------------------------------------------

/// In-process mock transport. Does not use real sockets.
///
/// Exposes counters and a reachability switch so tests can observe and
/// steer what the manager does with it.
#[derive(Debug)]
pub struct SimTransport {
    // ---
    local: IpAddr,
    remote: SocketAddr,
    dialect: Dialect,
    capabilities: Capabilities,
    signing_enforced: bool,
    echo_latency: Duration,
    fail_disconnect: bool,

    reachable: AtomicBool,
    disconnected: AtomicBool,
    echo_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

// ---

impl SimTransport {
    // ---
    fn new(local: IpAddr, remote: SocketAddr, signing_enforced: bool, config: &SimConfig) -> Self {
        // ---
        Self {
            local,
            remote,
            dialect: config.dialect,
            capabilities: config.capabilities,
            signing_enforced,
            echo_latency: config.echo_latency,
            fail_disconnect: config.failing_disconnects.contains(&remote.ip()),
            reachable: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            echo_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    // ---

    /// When false, every subsequent `echo` fails as if the server went away.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn signing_enforced(&self) -> bool {
        self.signing_enforced
    }

    pub fn echo_calls(&self) -> usize {
        self.echo_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

// ---

#[async_trait]
impl SmbTransport for SimTransport {
    // ---
    fn local_address(&self) -> IpAddr {
        self.local
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn has_capability(&self, cap: Capabilities) -> bool {
        self.capabilities.contains(cap)
    }

    async fn echo(&self) -> Result<()> {
        // ---
        self.echo_calls.fetch_add(1, Ordering::SeqCst);
        if !self.echo_latency.is_zero() {
            tokio::time::sleep(self.echo_latency).await;
        }

        if self.is_disconnected() {
            return Err(SmbError::Transport(format!("{} is disconnected", self.remote)));
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SmbError::Transport(format!("echo to {} timed out", self.remote)));
        }
        Ok(())
    }

    async fn disconnect(&self, force: bool) -> Result<()> {
        // ---
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let was_disconnected = self.disconnected.swap(true, Ordering::SeqCst);
        tracing::trace!(remote = %self.remote, force, was_disconnected, "sim transport disconnect");

        if self.fail_disconnect && !was_disconnected {
            return Err(SmbError::Transport(format!(
                "logoff to {} failed before socket close",
                self.remote
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimConnector
// ---------------------------------------------------------------------------

/// [`TransportConnector`] that hands out [`SimTransport`]s and keeps every
/// one it created for later inspection.
pub struct SimConnector {
    // ---
    config: SimConfig,
    transports: Mutex<Vec<Arc<SimTransport>>>,
    attempts: AtomicUsize,

    /// Remaining refusals per remote, set at runtime with `refuse_next`.
    refusals: Mutex<HashMap<IpAddr, usize>>,
}

// ---

impl SimConnector {
    // ---
    pub fn new(config: SimConfig) -> Self {
        // ---
        Self {
            config,
            transports: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            refusals: Mutex::new(HashMap::new()),
        }
    }

    // ---

    /// Every transport created so far, in creation order.
    pub fn transports(&self) -> Vec<Arc<SimTransport>> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent transport connected to `remote`.
    pub fn transport_to(&self, remote: IpAddr) -> Option<Arc<SimTransport>> {
        // ---
        self.transports()
            .into_iter()
            .rev()
            .find(|t| t.remote.ip() == remote)
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Refuse the next `count` connects to `remote`, on top of whatever
    /// the config refuses. `usize::MAX` refuses for good.
    pub fn refuse_next(&self, remote: IpAddr, count: usize) {
        self.refusals.lock().unwrap_or_else(PoisonError::into_inner).insert(remote, count);
    }

    fn take_refusal(&self, remote: IpAddr) -> bool {
        // ---
        let mut refusals = self.refusals.lock().unwrap_or_else(PoisonError::into_inner);
        match refusals.get_mut(&remote) {
            Some(0) | None => false,
            Some(left) => {
                if *left != usize::MAX {
                    *left -= 1;
                }
                true
            }
        }
    }
}

// ---

#[async_trait]
impl TransportConnector for SimConnector {
    // ---
    async fn connect(
        &self,
        local: IpAddr,
        remote: SocketAddr,
        signing_enforced: bool,
    ) -> Result<TransportPtr> {
        // ---
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.config.connect_latency.is_zero() {
            tokio::time::sleep(self.config.connect_latency).await;
        }

        if self.config.refused_remotes.contains(&remote.ip()) || self.take_refusal(remote.ip()) {
            return Err(SmbError::Transport(format!("connection to {remote} refused")));
        }

        let transport = Arc::new(SimTransport::new(local, remote, signing_enforced, &self.config));
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&transport));

        tracing::trace!(%local, %remote, dialect = %transport.dialect, "sim transport connected");
        Ok(transport)
    }
}

// ---
