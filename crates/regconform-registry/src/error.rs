//! Error types for registry operations.

use thiserror::Error;

/// Errors that can occur while exercising a registry.
///
/// Variants split into three classes. Protocol violations (see
/// [`RegistryError::is_protocol_violation`]) mean the registry did not honour
/// the contract. [`RegistryError::Unsupported`] means the registry declared an
/// optional operation unavailable. Everything else is a failure of the client
/// itself and says nothing about conformance.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("Failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Transport-level HTTP failure other than connecting.
    #[error("HTTP transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The call did not finish before its deadline.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline in seconds.
        seconds: u64,
    },

    /// The run was cancelled while the call was in flight.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        operation: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// A request could not be assembled locally.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },

    /// Local JSON encoding error.
    #[error("JSON error: {source}")]
    Json {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry answered with a status the contract does not allow.
    #[error("{operation}: expected {expected}, got {actual}{}", detail_suffix(.detail))]
    UnexpectedStatus {
        /// Operation being exercised.
        operation: &'static str,
        /// Acceptable statuses.
        expected: String,
        /// Status received.
        actual: u16,
        /// Error codes or body excerpt from the response.
        detail: String,
    },

    /// A required response header was absent.
    #[error("{operation}: missing {header} header")]
    MissingHeader {
        /// Operation being exercised.
        operation: &'static str,
        /// Header name.
        header: &'static str,
    },

    /// A response header had the wrong value, or was present when forbidden.
    #[error("{operation}: invalid {header} header '{value}': {reason}")]
    InvalidHeader {
        /// Operation being exercised.
        operation: &'static str,
        /// Header name.
        header: &'static str,
        /// Value received.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A 4xx response body did not follow the error body contract.
    #[error("{operation}: invalid error body for status {status}: {reason}")]
    ErrorBody {
        /// Operation being exercised.
        operation: &'static str,
        /// Response status.
        status: u16,
        /// What was wrong with it.
        reason: String,
    },

    /// A response body could not be decoded.
    #[error("{operation}: malformed response body: {source}")]
    MalformedBody {
        /// Operation being exercised.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Returned content does not match what was pushed.
    #[error("{operation}: content mismatch: expected {expected}, got {actual}")]
    ContentMismatch {
        /// Operation being exercised.
        operation: &'static str,
        /// Expected value (digest, length or listing).
        expected: String,
        /// Actual value.
        actual: String,
    },

    /// The registry declared an optional operation unsupported.
    #[error("{operation} not supported by registry (status {status})")]
    Unsupported {
        /// Operation being exercised.
        operation: &'static str,
        /// Status that signalled it.
        status: u16,
    },
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}

impl RegistryError {
    /// Returns true if the registry broke the protocol contract.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedStatus { .. }
                | Self::MissingHeader { .. }
                | Self::InvalidHeader { .. }
                | Self::ErrorBody { .. }
                | Self::MalformedBody { .. }
                | Self::ContentMismatch { .. }
        )
    }

    /// Returns true if the registry declared the operation unsupported.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json { source: err }
    }
}
