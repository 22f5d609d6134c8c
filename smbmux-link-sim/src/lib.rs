//! In-process simulated SMB server for smbmux unit and integration testing.
//!
//! [`SimConnector`] implements [`smbmux_domain::TransportConnector`] without
//! real sockets, [`SimTree`] implements [`smbmux_domain::TreeConnection`] and
//! [`SimInterfaces`] implements [`smbmux_domain::InterfaceSource`].
//! [`SimConfig`] controls injected behaviour:
//!
//! - Negotiated dialect and capability bits
//! - Connect and echo latency
//! - Refused remote addresses
//! - Remotes whose disconnect reports failure
//!
//! # Quick start
//!
//! ```rust
//! use smbmux_link_sim::{SimConfig, SimConnector, SimInterfaces};
//!
//! let connector = SimConnector::new(SimConfig::smb311());
//! let interfaces = SimInterfaces::usable(3);
//! ```

mod config;
mod interfaces;
mod transport;
mod tree;

// --- public API
pub use config::SimConfig;
pub use interfaces::{nic, SimInterfaces};
pub use transport::{SimConnector, SimTransport};
pub use tree::{SimTree, MISSING_PREFIX};
