//! Core traits, types and error vocabulary for the smbmux multi-channel
//! SMB client.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `smbmux-domain` and speak its types. No connection logic lives here.
//!
//! # Structure
//!
//! - [`error`]     — [`SmbError`] and [`Result<T>`] alias
//! - [`operation`] — [`SmbOperationError`], [`ErrorCode`], [`ErrorCategory`]
//! - [`retry`]     — [`RetryPolicy`] presets and [`retry_operation`]
//! - [`strategy`]  — [`LoadBalancingStrategy`]
//! - [`protocol`]  — [`Dialect`], [`Capabilities`], [`FileId`]
//! - [`transport`] — [`SmbTransport`], [`TransportConnector`] traits
//! - [`tree`]      — [`TreeConnection`] trait
//! - [`interface`] — [`NetworkInterface`], [`InterfaceSource`] trait

mod error;
mod interface;
mod operation;
mod protocol;
mod retry;
mod strategy;
mod transport;
mod tree;

// --- error
pub use error::{Result, SmbError};

// --- operation
pub use operation::{ErrorCategory, ErrorCode, SmbOperationError};

// --- retry
pub use retry::{retry_operation, RetryPolicy};

// --- strategy
pub use strategy::LoadBalancingStrategy;

// --- protocol
pub use protocol::{
    // ---
    Capabilities,
    Dialect,
    FileId,
    OpenedFile,
};

// --- transport
pub use transport::{SmbTransport, TransportConnector, TransportPtr};

// --- tree
pub use tree::TreeConnection;

// --- interface
pub use interface::{InterfaceSource, NetworkInterface};
