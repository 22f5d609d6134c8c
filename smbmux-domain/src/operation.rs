use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Coarse grouping of [`ErrorCode`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    // ---
    Network,
    Authentication,
    FileSystem,
    Protocol,
    Resource,
    Configuration,
    Transient,
    Unknown,
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Classified failure of an SMB operation.
///
/// Each code carries a fixed description, a category and whether the
/// failure is worth retrying at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // --- network
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionReset,
    HostNotFound,

    // --- authentication
    AuthenticationFailed,
    AccessDenied,
    InvalidCredentials,
    SessionExpired,

    // --- file system
    FileNotFound,
    PathNotFound,
    FileExists,
    DirectoryNotEmpty,
    DiskFull,
    QuotaExceeded,

    // --- protocol
    InvalidParameter,
    NotSupported,
    InvalidProtocol,
    MessageTooLarge,

    // --- resource
    OutOfMemory,
    TooManySessions,
    ResourceLocked,

    // --- transient
    Busy,
    TryAgain,
    ServiceUnavailable,

    // --- unknown
    UnknownError,
    InternalError,
}

// ---

impl ErrorCode {
    // ---
    pub fn name(self) -> &'static str {
        // ---
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionReset => "CONNECTION_RESET",
            ErrorCode::HostNotFound => "HOST_NOT_FOUND",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ErrorCode::FileExists => "FILE_EXISTS",
            ErrorCode::DirectoryNotEmpty => "DIRECTORY_NOT_EMPTY",
            ErrorCode::DiskFull => "DISK_FULL",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
            ErrorCode::InvalidProtocol => "INVALID_PROTOCOL",
            ErrorCode::MessageTooLarge => "MESSAGE_TOO_LARGE",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::TooManySessions => "TOO_MANY_SESSIONS",
            ErrorCode::ResourceLocked => "RESOURCE_LOCKED",
            ErrorCode::Busy => "BUSY",
            ErrorCode::TryAgain => "TRY_AGAIN",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    // ---

    pub fn description(self) -> &'static str {
        // ---
        match self {
            ErrorCode::ConnectionFailed => "Network connection failed",
            ErrorCode::ConnectionTimeout => "Connection timed out",
            ErrorCode::ConnectionReset => "Connection reset by peer",
            ErrorCode::HostNotFound => "Host not found",
            ErrorCode::AuthenticationFailed => "Authentication failed",
            ErrorCode::AccessDenied => "Access denied",
            ErrorCode::InvalidCredentials => "Invalid credentials",
            ErrorCode::SessionExpired => "Session expired",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::PathNotFound => "Path not found",
            ErrorCode::FileExists => "File already exists",
            ErrorCode::DirectoryNotEmpty => "Directory not empty",
            ErrorCode::DiskFull => "Disk full",
            ErrorCode::QuotaExceeded => "Quota exceeded",
            ErrorCode::InvalidParameter => "Invalid parameter",
            ErrorCode::NotSupported => "Operation not supported",
            ErrorCode::InvalidProtocol => "Invalid protocol",
            ErrorCode::MessageTooLarge => "Message too large",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::TooManySessions => "Too many sessions",
            ErrorCode::ResourceLocked => "Resource is locked",
            ErrorCode::Busy => "Server busy",
            ErrorCode::TryAgain => "Try again later",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::UnknownError => "Unknown error",
            ErrorCode::InternalError => "Internal error",
        }
    }

    // ---

    pub fn category(self) -> ErrorCategory {
        // ---
        use ErrorCode::*;
        match self {
            ConnectionFailed | ConnectionTimeout | ConnectionReset | HostNotFound => {
                ErrorCategory::Network
            }
            AuthenticationFailed | AccessDenied | InvalidCredentials | SessionExpired => {
                ErrorCategory::Authentication
            }
            FileNotFound | PathNotFound | FileExists | DirectoryNotEmpty => {
                ErrorCategory::FileSystem
            }
            DiskFull | QuotaExceeded | OutOfMemory | TooManySessions | ResourceLocked => {
                ErrorCategory::Resource
            }
            InvalidParameter | NotSupported | InvalidProtocol | MessageTooLarge => {
                ErrorCategory::Protocol
            }
            Busy | TryAgain | ServiceUnavailable => ErrorCategory::Transient,
            UnknownError | InternalError => ErrorCategory::Unknown,
        }
    }

    // ---

    /// Whether the failure class is retryable at all, before any policy
    /// is consulted.
    pub fn is_retryable(self) -> bool {
        // ---
        use ErrorCode::*;
        matches!(
            self,
            ConnectionFailed
                | ConnectionTimeout
                | ConnectionReset
                | SessionExpired
                | OutOfMemory
                | TooManySessions
                | ResourceLocked
                | Busy
                | TryAgain
                | ServiceUnavailable
        )
    }
}

// ---

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// SmbOperationError
// ---------------------------------------------------------------------------

/// A classified operation failure carrying its own [`RetryPolicy`].
///
/// Renders as `[CODE] description` or `[CODE] description: message`.
#[derive(Debug, Clone)]
pub struct SmbOperationError {
    // ---
    code: ErrorCode,
    message: String,
    policy: RetryPolicy,
    context: BTreeMap<String, String>,
    nt_status: Option<u32>,
    started: Instant,
    attempt: u32,
}

// ---

impl SmbOperationError {
    // ---
    pub fn new(code: ErrorCode, message: impl Into<String>, policy: RetryPolicy) -> Self {
        // ---
        Self {
            code,
            message: message.into(),
            policy,
            context: BTreeMap::new(),
            nt_status: None,
            started: Instant::now(),
            attempt: 1,
        }
    }

    // ---

    /// Copy of `self` re-stamped with a new attempt number.
    ///
    /// The operation start time is carried over so the policy's overall
    /// time limit spans every attempt.
    pub fn for_retry(&self, attempt: u32) -> Self {
        // ---
        Self {
            attempt,
            ..self.clone()
        }
    }

    // ---

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_nt_status(mut self, status: u32) -> Self {
        self.nt_status = Some(status);
        self
    }

    // ---

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn nt_status(&self) -> Option<u32> {
        self.nt_status
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    // ---

    /// Retryable when the code is and the policy is not [`RetryPolicy::NO_RETRY`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable() && self.policy != RetryPolicy::NO_RETRY
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.policy.should_retry(self, attempt)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.policy.delay(attempt)
    }
}

// ---

impl fmt::Display for SmbOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "[{}] {}", self.code.name(), self.code.description())?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for SmbOperationError {}

// ---
