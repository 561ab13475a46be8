//! Error types for fetchq.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are grouped into five categories:
//! - **Request**: the caller aborted the request or supplied an invalid one
//! - **Network**: the transport failed or the origin answered with a failure status
//! - **Cache**: the response could not be buffered, found, or persisted
//! - **Configuration**: config file parsing, validation, or missing values
//! - **Internal**: I/O, serialization, or unclassified failures
//!
//! Each error has a stable error code (e.g., `FQ-N001`) for programmatic handling.
//!
//! Every request handed to the scheduler resolves with exactly one of these
//! values or a body. Nothing in this crate retries; `is_retryable` only
//! tells callers whether re-enqueueing is worth trying.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancelled or malformed requests.
    Request,
    /// Transport failures and unsuccessful HTTP statuses.
    Network,
    /// Buffering, lookup, and persistence of cached responses.
    Cache,
    /// Configuration issues (parse errors, invalid values, missing files).
    Configuration,
    /// Internal errors (I/O, serialization, unexpected state).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Request => "Request error",
            Self::Network => "Network error",
            Self::Cache => "Cache error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Request => "R",
            Self::Network => "N",
            Self::Cache => "K",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `fetchq` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Origin answered with a non-success status
    HttpError = 2,
    /// Invalid arguments or configuration
    UsageError = 3,
    /// Timeout
    Timeout = 4,
    /// Request cancelled (e.g. Ctrl-C)
    Cancelled = 130,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for fetchq operations.
#[derive(Error, Debug)]
pub enum FetchqError {
    // ==========================================================================
    // Request errors (Category: Request)
    // ==========================================================================
    /// The request was cancelled by its owner, queued or in flight.
    #[error("request cancelled")]
    Cancelled,

    /// The request was rejected before being queued.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// The transport failed to deliver a response.
    #[error("transport error for {uri}: {message}")]
    Transport { uri: String, message: String },

    /// The transport gave up waiting for the origin.
    #[error("request to {uri} timed out after {seconds}s")]
    Timeout { uri: String, seconds: u64 },

    /// The origin answered with a non-2xx status.
    #[error("received unsuccessful response {status} ({reason}) from {uri}")]
    UnsuccessfulResponse {
        uri: String,
        status: u16,
        reason: String,
    },

    // ==========================================================================
    // Cache errors (Category: Cache)
    // ==========================================================================
    /// The advertised or observed body size exceeds the buffer budget.
    #[error("content length {content_length} exceeds buffer budget of {budget} bytes")]
    ResponseTooLarge { content_length: u64, budget: usize },

    /// A cache hit was expected but the index has no entry for the key.
    #[error("no cache entry for key '{key}'")]
    EntryNotFound { key: String },

    /// Persisting a cached body failed. Logged, never handed to callers.
    #[error("failed to write cache blob for '{key}': {message}")]
    CacheWriteFailed { key: String, message: String },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Configuration file not found at an explicitly requested path.
    #[error("config file not found: {path}")]
    ConfigNotFound { path: String },

    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchqError {
    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Cancelled => ExitCode::Cancelled,
            Self::Timeout { .. } => ExitCode::Timeout,
            Self::UnsuccessfulResponse { .. } => ExitCode::HttpError,

            Self::InvalidRequest(_)
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. } => ExitCode::UsageError,

            Self::Transport { .. }
            | Self::ResponseTooLarge { .. }
            | Self::EntryNotFound { .. }
            | Self::CacheWriteFailed { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::InvalidRequest(_) => ErrorCategory::Request,

            Self::Transport { .. } | Self::Timeout { .. } | Self::UnsuccessfulResponse { .. } => {
                ErrorCategory::Network
            }

            Self::ResponseTooLarge { .. }
            | Self::EntryNotFound { .. }
            | Self::CacheWriteFailed { .. } => ErrorCategory::Cache,

            Self::ConfigNotFound { .. } | Self::ConfigParse { .. } | Self::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `FQ-{category}{number}` where category is:
    /// - R: Request
    /// - N: Network
    /// - K: Cache
    /// - C: Configuration
    /// - X: Internal
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "FQ-R001",
            Self::InvalidRequest(_) => "FQ-R002",

            Self::Transport { .. } => "FQ-N001",
            Self::Timeout { .. } => "FQ-N002",
            Self::UnsuccessfulResponse { .. } => "FQ-N003",

            Self::ResponseTooLarge { .. } => "FQ-K001",
            Self::EntryNotFound { .. } => "FQ-K002",
            Self::CacheWriteFailed { .. } => "FQ-K003",

            Self::ConfigNotFound { .. } => "FQ-C001",
            Self::ConfigParse { .. } => "FQ-C002",
            Self::ConfigInvalid { .. } => "FQ-C003",

            Self::Io(_) => "FQ-X001",
            Self::Json(_) => "FQ-X002",
            Self::Other(_) => "FQ-X099",
        }
    }

    /// Returns whether re-enqueueing the same request could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::UnsuccessfulResponse { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether a UI should surface this error to the user.
    ///
    /// Cancellation is the caller's own doing and cache write failures are
    /// invisible by construction.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::CacheWriteFailed { .. })
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnsuccessfulResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Build a timeout error from a transport timeout.
    #[must_use]
    pub fn timeout(uri: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            uri: uri.into(),
            seconds: after.as_secs(),
        }
    }
}

/// Result type alias for fetchq operations.
pub type Result<T> = std::result::Result<T, FetchqError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unsuccessful(status: u16) -> FetchqError {
        FetchqError::UnsuccessfulResponse {
            uri: "https://example.com/x".to_string(),
            status,
            reason: "whatever".to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // ErrorCategory tests
    // -------------------------------------------------------------------------

    #[test]
    fn error_category_description() {
        assert_eq!(ErrorCategory::Request.description(), "Request error");
        assert_eq!(ErrorCategory::Network.description(), "Network error");
        assert_eq!(ErrorCategory::Cache.description(), "Cache error");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal error");
    }

    #[test]
    fn error_codes_match_category_prefix() {
        let errors = vec![
            FetchqError::Cancelled,
            FetchqError::InvalidRequest("empty uri".to_string()),
            FetchqError::Transport {
                uri: "u".to_string(),
                message: "reset".to_string(),
            },
            FetchqError::timeout("u", Duration::from_secs(30)),
            unsuccessful(404),
            FetchqError::ResponseTooLarge {
                content_length: 10,
                budget: 5,
            },
            FetchqError::EntryNotFound {
                key: "k".to_string(),
            },
            FetchqError::CacheWriteFailed {
                key: "k".to_string(),
                message: "disk full".to_string(),
            },
            FetchqError::ConfigNotFound {
                path: "/tmp/x.toml".to_string(),
            },
        ];

        for err in errors {
            let expected = format!("FQ-{}", err.category().code_prefix());
            assert!(
                err.error_code().starts_with(&expected),
                "{:?} has code {} but category prefix {}",
                err,
                err.error_code(),
                expected
            );
        }
    }

    #[test]
    fn exit_codes_are_correct() {
        assert_eq!(FetchqError::Cancelled.exit_code(), ExitCode::Cancelled);
        assert_eq!(unsuccessful(500).exit_code(), ExitCode::HttpError);
        assert_eq!(
            FetchqError::timeout("u", Duration::from_secs(1)).exit_code(),
            ExitCode::Timeout
        );
        assert_eq!(
            FetchqError::InvalidRequest("x".to_string()).exit_code(),
            ExitCode::UsageError
        );
        assert_eq!(i32::from(ExitCode::Cancelled), 130);
    }

    #[test]
    fn retryable_errors() {
        assert!(unsuccessful(503).is_retryable());
        assert!(unsuccessful(429).is_retryable());
        assert!(!unsuccessful(404).is_retryable());
        assert!(!FetchqError::Cancelled.is_retryable());
        assert!(
            FetchqError::Transport {
                uri: "u".to_string(),
                message: "dns".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn cache_write_failures_are_not_user_visible() {
        assert!(
            !FetchqError::CacheWriteFailed {
                key: "k".to_string(),
                message: "m".to_string(),
            }
            .is_user_visible()
        );
        assert!(!FetchqError::Cancelled.is_user_visible());
        assert!(unsuccessful(404).is_user_visible());
    }

    #[test]
    fn unsuccessful_response_carries_status() {
        let err = unsuccessful(418);
        assert_eq!(err.status_code(), Some(418));
        assert!(err.to_string().contains("418"));
        assert_eq!(FetchqError::Cancelled.status_code(), None);
    }
}
