use thiserror::Error;

use super::operation::SmbOperationError;

// ---

#[derive(Debug, Error)]
pub enum SmbError {
    // ---
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to create any channels for session {session_id}")]
    NoChannels { session_id: String },

    #[error("channel group for session {session_id} was replaced or removed while it was being created")]
    Superseded { session_id: String },

    #[error("channel rejected: {0}")]
    ChannelRejected(String),

    #[error("channel {channel_id} could not be re-established and was removed")]
    ChannelLost { channel_id: String },

    #[error("channel {channel_id} is already being recovered")]
    RecoveryInProgress { channel_id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("descriptor is no longer valid")]
    InvalidHandle,

    #[error("handle already closed")]
    HandleClosed,

    #[error("server returned status {status:#010x}")]
    Protocol { status: u32 },

    #[error(transparent)]
    Operation(#[from] SmbOperationError),

    #[error("multi-channel manager is shut down")]
    ShutDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

impl SmbError {
    // ---
    /// True for errors a caller may reasonably retry on another channel.
    pub fn is_retryable(&self) -> bool {
        match self {
            SmbError::Transport(_) | SmbError::Io(_) => true,
            SmbError::Operation(op) => op.is_retryable(),
            _ => false,
        }
    }
}

// ---

pub type Result<T> = std::result::Result<T, SmbError>;

// ---
