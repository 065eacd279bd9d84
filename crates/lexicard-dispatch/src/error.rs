//! Error types for fetch dispatch operations.
//!
//! Every per-unit failure is captured as a [`DispatchError`] and recorded on
//! the unit it happened to. None of them ever propagate out of the dispatch
//! loop; callers only see them after draining, through the failed-work set.

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions observed while fetching or while building work units.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Connection-level failure (refused, reset, DNS, TLS).
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Connecting to the remote host timed out.
    #[error("connect timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured connect timeout
        timeout_seconds: u64,
    },

    /// Remote answered 429.
    #[error("rate limited by remote (HTTP 429)")]
    RateLimited {
        /// Value of the Retry-After header, when present
        retry_after_seconds: Option<u64>,
    },

    /// Remote answered with a 5xx status.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
    },

    /// Remote answered with a status the unit did not expect.
    #[error("unexpected status: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// Downloaded payload could not be written to disk.
    #[error("failed to write {path}: {message}")]
    StorageError {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error message
        message: String,
    },

    /// A producer-supplied target could not be turned into a request.
    #[error("invalid target: {message}")]
    InvalidTarget {
        /// Why the target was rejected
        message: String,
    },

    /// Dispatcher or client configuration is unusable.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The unit used up every attempt it was allowed.
    #[error("fetch failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// The dispatcher is shutting down.
    #[error("dispatcher shutdown requested")]
    ShutdownRequested,

    /// The dispatch loop did not stop within the shutdown timeout.
    #[error("dispatcher shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: std::time::Duration,
    },

    /// A result handler panicked or another internal invariant broke.
    #[error("internal dispatch error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DispatchError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a server error.
    pub fn server_error(status_code: u16) -> Self {
        Self::ServerError { status_code }
    }

    /// Creates an unexpected status error.
    pub fn unexpected_status(status_code: u16) -> Self {
        Self::UnexpectedStatus { status_code }
    }

    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StorageError { path: path.into(), message: message.into() }
    }

    /// Creates an invalid target error.
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32) -> Self {
        Self::RetriesExhausted { attempts }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Maps a non-success status onto the matching remote-rejection error.
    pub fn from_status(status_code: u16, retry_after_seconds: Option<u64>) -> Self {
        match status_code {
            429 => Self::rate_limited(retry_after_seconds),
            500..=599 => Self::server_error(status_code),
            _ => Self::unexpected_status(status_code),
        }
    }

    /// Whether a unit that hit this error may be attempted again.
    ///
    /// Returns `true` for transport failures, remote distress, unexpected
    /// statuses and local write failures. Returns `false` for malformed
    /// targets, configuration problems, exhausted budgets, shutdown and
    /// internal errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::UnexpectedStatus { .. }
            | Self::StorageError { .. } => true,

            Self::InvalidTarget { .. }
            | Self::ConfigurationError { .. }
            | Self::RetriesExhausted { .. }
            | Self::ShutdownRequested
            | Self::ShutdownTimeout { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Whether the error is a transport-level failure rather than a remote
    /// answer.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout { .. })
    }
}

/// Category of dispatch error for logs and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection-level failures.
    Transport,
    /// Remote distress (429, 5xx).
    RemoteDistress,
    /// Other unexpected remote statuses.
    RemoteUnexpected,
    /// Local file system failures.
    Storage,
    /// Bad targets or configuration.
    Configuration,
    /// Lifecycle and internal problems.
    Internal,
}

impl From<&DispatchError> for ErrorCategory {
    fn from(error: &DispatchError) -> Self {
        match error {
            DispatchError::NetworkError { .. } | DispatchError::Timeout { .. } => Self::Transport,
            DispatchError::RateLimited { .. } | DispatchError::ServerError { .. } => {
                Self::RemoteDistress
            },
            DispatchError::UnexpectedStatus { .. } | DispatchError::RetriesExhausted { .. } => {
                Self::RemoteUnexpected
            },
            DispatchError::StorageError { .. } => Self::Storage,
            DispatchError::InvalidTarget { .. } | DispatchError::ConfigurationError { .. } => {
                Self::Configuration
            },
            DispatchError::ShutdownRequested
            | DispatchError::ShutdownTimeout { .. }
            | DispatchError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::RemoteDistress => write!(f, "remote_distress"),
            Self::RemoteUnexpected => write!(f, "remote_unexpected"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DispatchError::network("connection refused").is_retryable());
        assert!(DispatchError::timeout(10).is_retryable());
        assert!(DispatchError::server_error(503).is_retryable());
        assert!(DispatchError::rate_limited(Some(30)).is_retryable());
        assert!(DispatchError::unexpected_status(403).is_retryable());
        assert!(DispatchError::storage("/tmp/a.mp3", "disk full").is_retryable());

        assert!(!DispatchError::invalid_target("no scheme").is_retryable());
        assert!(!DispatchError::configuration("capacity is zero").is_retryable());
        assert!(!DispatchError::retries_exhausted(6).is_retryable());
        assert!(!DispatchError::ShutdownRequested.is_retryable());
        assert!(!DispatchError::internal("handler panicked").is_retryable());
    }

    #[test]
    fn statuses_map_to_rejection_errors() {
        assert!(matches!(
            DispatchError::from_status(429, Some(5)),
            DispatchError::RateLimited { retry_after_seconds: Some(5) }
        ));
        assert!(matches!(
            DispatchError::from_status(502, None),
            DispatchError::ServerError { status_code: 502 }
        ));
        assert!(matches!(
            DispatchError::from_status(418, None),
            DispatchError::UnexpectedStatus { status_code: 418 }
        ));
    }

    #[test]
    fn only_network_and_timeout_are_transport_failures() {
        assert!(DispatchError::network("reset").is_transport_failure());
        assert!(DispatchError::timeout(10).is_transport_failure());
        assert!(!DispatchError::server_error(500).is_transport_failure());
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DispatchError::network("x")), ErrorCategory::Transport);
        assert_eq!(
            ErrorCategory::from(&DispatchError::rate_limited(None)),
            ErrorCategory::RemoteDistress
        );
        assert_eq!(
            ErrorCategory::from(&DispatchError::unexpected_status(403)),
            ErrorCategory::RemoteUnexpected
        );
        assert_eq!(ErrorCategory::from(&DispatchError::storage("a", "b")), ErrorCategory::Storage);
        assert_eq!(ErrorCategory::RemoteDistress.to_string(), "remote_distress");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DispatchError::timeout(10).to_string(), "connect timeout after 10s");
        assert_eq!(DispatchError::server_error(503).to_string(), "server error: HTTP 503");
        assert_eq!(
            DispatchError::retries_exhausted(6).to_string(),
            "fetch failed after 6 attempts"
        );
    }
}
