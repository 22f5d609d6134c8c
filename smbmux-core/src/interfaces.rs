use smbmux_domain::{InterfaceSource, NetworkInterface, Result};

// ---------------------------------------------------------------------------
// SystemInterfaces
// ---------------------------------------------------------------------------

/// The host's real network interfaces, read with `getifaddrs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

// ---

#[cfg(unix)]
impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        // ---
        use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

        use nix::ifaddrs::getifaddrs;
        use nix::net::if_::InterfaceFlags;

        let addrs = getifaddrs().map_err(std::io::Error::from)?;

        // getifaddrs yields one entry per (interface, address); fold them
        // back into interfaces, keeping first-seen order.
        let mut interfaces: Vec<NetworkInterface> = Vec::new();
        for ifa in addrs {
            let pos = match interfaces.iter().position(|i| i.name == ifa.interface_name) {
                Some(pos) => pos,
                None => {
                    interfaces.push(NetworkInterface {
                        is_virtual: ifa.interface_name.contains(':'),
                        name: ifa.interface_name.clone(),
                        addresses: Vec::new(),
                        is_loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                        is_up: ifa.flags.contains(InterfaceFlags::IFF_UP),
                    });
                    interfaces.len() - 1
                }
            };

            let Some(storage) = ifa.address else {
                continue;
            };
            let ip = if let Some(v4) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*v4).ip())
            } else if let Some(v6) = storage.as_sockaddr_in6() {
                IpAddr::V6(*SocketAddrV6::from(*v6).ip())
            } else {
                continue;
            };
            interfaces[pos].addresses.push(ip);
        }

        tracing::debug!(count = interfaces.len(), "enumerated system interfaces");
        Ok(interfaces)
    }
}

// ---

#[cfg(not(unix))]
impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        tracing::warn!("interface enumeration is not supported on this platform");
        Ok(Vec::new())
    }
}

// ---
