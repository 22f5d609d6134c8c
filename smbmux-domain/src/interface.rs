use std::net::IpAddr;

use super::error::Result;

// ---------------------------------------------------------------------------
// NetworkInterface
// ---------------------------------------------------------------------------

/// One local network interface and the addresses bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    // ---
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub is_loopback: bool,
    pub is_up: bool,
    pub is_virtual: bool,
}

// ---

impl NetworkInterface {
    // ---
    /// Up, not loopback, not virtual, with at least one address.
    pub fn is_usable(&self) -> bool {
        self.is_up && !self.is_loopback && !self.is_virtual && !self.addresses.is_empty()
    }

    /// Address to bind when talking to `remote`: the first one of the same
    /// family, else the first one at all.
    pub fn address_for(&self, remote: IpAddr) -> Option<IpAddr> {
        // ---
        self.addresses
            .iter()
            .copied()
            .find(|a| a.is_ipv4() == remote.is_ipv4())
            .or_else(|| self.addresses.first().copied())
    }
}

// ---------------------------------------------------------------------------
// InterfaceSource
// ---------------------------------------------------------------------------

/// Enumerates the host's network interfaces.
///
/// Implementations: `smbmux_core::SystemInterfaces`,
/// `smbmux_link_sim::SimInterfaces`.
pub trait InterfaceSource: Send + Sync {
    // ---
    fn interfaces(&self) -> Result<Vec<NetworkInterface>>;
}

// ---
