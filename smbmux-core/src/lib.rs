//! Multi-channel SMB connection manager and reference-counted handles.
//!
//! Two halves share this crate. The channel half pools the physical
//! connections of a session and balances requests across them; the handle
//! half keeps tree, file and pipe handles valid only while the tree they
//! came from is.
//!
//! # Structure
//!
//! - [`config`]        — [`MultiChannelConfig`]
//! - [`manager`]       — [`MultiChannelManager`], [`ChannelLease`]
//! - [`channel_group`] — [`ChannelGroup`] (copy-on-write, load balancing)
//! - [`channel`]       — [`ChannelInfo`]
//! - [`stats`]         — [`ChannelStatistics`]
//! - [`interfaces`]    — [`SystemInterfaces`] (`getifaddrs`)
//! - [`tree_handle`]   — [`TreeHandle`]
//! - [`file_handle`]   — [`FileHandle`]
//! - [`pipe_handle`]   — [`PipeHandle`]
//! - [`context`]       — [`HandleContext`] shared by a handle chain
//! - [`buffer_cache`]  — [`BufferCache`]
//! - [`audit`]         — [`LeakAuditor`]

mod audit;
mod buffer_cache;
mod channel;
mod channel_group;
mod config;
mod context;
mod file_handle;
mod interfaces;
mod manager;
mod pipe_handle;
mod stats;
mod tree_handle;
mod usage;
mod worker;

// --- config
pub use config::{MultiChannelConfig, MAX_BUFFER_SIZE, SMB_PORT};

// --- channels
pub use channel::ChannelInfo;
pub use channel_group::ChannelGroup;
pub use manager::{ChannelLease, MultiChannelManager};
pub use stats::ChannelStatistics;

// --- interfaces
pub use interfaces::SystemInterfaces;

// --- handles
pub use context::HandleContext;
pub use file_handle::FileHandle;
pub use pipe_handle::PipeHandle;
pub use tree_handle::TreeHandle;

// --- support
pub use audit::{HandleKind, LeakAuditor, LeakReport};
pub use buffer_cache::{BufferCache, CachedBuffer};
