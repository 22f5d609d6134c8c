use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

use super::error::Result;
use super::protocol::{Capabilities, Dialect};

// ---------------------------------------------------------------------------
// SmbTransport
// ---------------------------------------------------------------------------

/// A negotiated connection to an SMB server, bound to one local address.
///
/// A channel owns at most one transport. Dialect and capabilities are
/// fixed once negotiation completes.
///
/// `#[async_trait]` keeps the async methods dyn-compatible so that
/// [`TransportPtr`] can be shared across channel, health and teardown tasks.
#[async_trait]
pub trait SmbTransport: Send + Sync {
    // ---
    fn local_address(&self) -> IpAddr;

    fn remote_address(&self) -> SocketAddr;

    fn dialect(&self) -> Dialect;

    fn is_smb2_or_later(&self) -> bool {
        self.dialect().is_smb2_or_later()
    }

    fn has_capability(&self, cap: Capabilities) -> bool;

    /// Round-trip an ECHO request. Used as the liveness probe.
    async fn echo(&self) -> Result<()>;

    /// Tear the connection down. `force` skips waiting for outstanding
    /// requests. Calling this twice is harmless.
    async fn disconnect(&self, force: bool) -> Result<()>;
}

// ---

/// Shared, heap-allocated [`SmbTransport`].
pub type TransportPtr = Arc<dyn SmbTransport>;

// ---------------------------------------------------------------------------
// TransportConnector
// ---------------------------------------------------------------------------

/// Factory for transports bound to a specific local address.
///
/// Implementations: `smbmux_link_sim::SimConnector`.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    // ---
    /// Open and negotiate a connection from `local` to `remote`.
    async fn connect(
        &self,
        local: IpAddr,
        remote: SocketAddr,
        signing_enforced: bool,
    ) -> Result<TransportPtr>;
}
