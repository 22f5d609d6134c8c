use std::net::{IpAddr, Ipv4Addr};

use smbmux_domain::{InterfaceSource, NetworkInterface, Result, SmbError};

// ---------------------------------------------------------------------------
// SimInterfaces
// ---------------------------------------------------------------------------

/// Fixed, scripted interface list.
#[derive(Debug, Clone, Default)]
pub struct SimInterfaces {
    // ---
    interfaces: Vec<NetworkInterface>,
    fail: bool,
}

// ---

impl SimInterfaces {
    // ---
    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self {
            interfaces,
            fail: false,
        }
    }

    // ---

    /// Loopback plus `n` usable NICs `eth0..` addressed `10.0.<i>.2`, plus
    /// one down NIC and one virtual alias that must be filtered out.
    pub fn usable(n: u8) -> Self {
        // ---
        let mut interfaces = vec![NetworkInterface {
            name: "lo".into(),
            addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            is_loopback: true,
            is_up: true,
            is_virtual: false,
        }];

        for i in 0..n {
            interfaces.push(nic(&format!("eth{i}"), IpAddr::V4(Ipv4Addr::new(10, 0, i, 2))));
        }

        let mut down = nic("wlan0", IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)));
        down.is_up = false;
        interfaces.push(down);

        let mut alias = nic("eth0:1", IpAddr::V4(Ipv4Addr::new(10, 0, 250, 2)));
        alias.is_virtual = true;
        interfaces.push(alias);

        Self::new(interfaces)
    }

    // ---

    /// Every enumeration fails, as when the OS call is denied.
    pub fn failing() -> Self {
        Self {
            interfaces: Vec::new(),
            fail: true,
        }
    }
}

// ---

impl InterfaceSource for SimInterfaces {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        // ---
        if self.fail {
            return Err(SmbError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "interface enumeration denied",
            )));
        }
        Ok(self.interfaces.clone())
    }
}

// ---

/// A healthy physical NIC with a single address.
pub fn nic(name: &str, address: IpAddr) -> NetworkInterface {
    // ---
    NetworkInterface {
        name: name.to_string(),
        addresses: vec![address],
        is_loopback: false,
        is_up: true,
        is_virtual: name.contains(':'),
    }
}

// ---
