//! Error types for the SyftBox client.
//!
//! Every failure the library can surface is a `SyftError`. Variants are grouped
//! by the component that raises them; `kind()` folds them back onto the coarse
//! taxonomy callers usually branch on.
//!
//! The enum is `Clone` because a deduplicated poll hands the same outcome to
//! every waiter. Foreign errors are therefore captured as strings, while
//! re-classified errors keep the original `SyftError` as their source.

use std::time::Duration;
use thiserror::Error;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No token, or the token could not be refreshed.
    Authentication,
    /// Socket could not be opened or written to.
    Connection,
    /// A network or overall-operation deadline was exceeded.
    Timeout,
    /// A poll failed for a non-timeout reason.
    Poll,
    /// The operation was cancelled explicitly.
    Cancelled,
    /// Malformed input rejected before any network call.
    InvalidRequest,
    /// Transport failure or remote server error.
    Network,
    /// Local misconfiguration or decoding failure.
    Internal,
}

/// Main error type for the SyftBox client.
#[derive(Debug, Clone, Error)]
pub enum SyftError {
    // Authentication errors
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("WebSocket authentication failed: {message}")]
    WebSocketAuthenticationFailed { message: String },

    // Real-time transport errors
    #[error("WebSocket connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("WebSocket send failed: {message}")]
    SendFailed { message: String },

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // RPC errors
    #[error("Failed to send message: {message}")]
    RpcSendFailed {
        message: String,
        #[source]
        source: Option<Box<SyftError>>,
    },

    #[error("Poll timed out for request {request_id}")]
    PollTimeout { request_id: String },

    #[error("Request {request_id} not found (it may have expired)")]
    PollNotFound { request_id: String },

    #[error("Poll failed for request {request_id}: {message}")]
    PollFailed {
        request_id: String,
        message: String,
        #[source]
        source: Option<Box<SyftError>>,
    },

    #[error("Poll cancelled for request {request_id}")]
    PollCancelled { request_id: String },

    #[error("Maximum poll attempts ({attempts}) exceeded for request {request_id}")]
    MaxPollAttemptsExceeded { request_id: String, attempts: u32 },

    #[error("Send and wait timed out after {timeout:?}")]
    SendAndWaitTimeout {
        timeout: Duration,
        request_id: Option<String>,
    },

    // Validation errors
    #[error("Invalid request for {field}: {message}")]
    InvalidRequest { field: String, message: String },

    #[error("Invalid syft URL '{input}': {message}")]
    InvalidSyftUrl { input: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation was cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, SyftError>;

impl From<serde_json::Error> for SyftError {
    fn from(err: serde_json::Error) -> Self {
        SyftError::Json {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyftError {
    fn from(err: reqwest::Error) -> Self {
        SyftError::Network {
            message: err.to_string(),
            cause: std::error::Error::source(&err).map(|s| s.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyftError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyftError::ConnectionFailed {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SyftError {
    fn from(err: url::ParseError) -> Self {
        SyftError::Config {
            message: format!("invalid URL: {}", err),
        }
    }
}

impl SyftError {
    /// Shorthand for a validation failure on one field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyftError::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Map onto the coarse error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyftError::Authentication { .. } | SyftError::WebSocketAuthenticationFailed { .. } => {
                ErrorKind::Authentication
            }

            SyftError::ConnectionFailed { .. } | SyftError::SendFailed { .. } => {
                ErrorKind::Connection
            }

            SyftError::Timeout(_)
            | SyftError::PollTimeout { .. }
            | SyftError::MaxPollAttemptsExceeded { .. }
            | SyftError::SendAndWaitTimeout { .. } => ErrorKind::Timeout,

            SyftError::PollNotFound { .. } | SyftError::PollFailed { .. } => ErrorKind::Poll,

            SyftError::PollCancelled { .. } | SyftError::Cancelled => ErrorKind::Cancelled,

            SyftError::InvalidRequest { .. } | SyftError::InvalidSyftUrl { .. } => {
                ErrorKind::InvalidRequest
            }

            SyftError::Network { .. } | SyftError::Http { .. } => ErrorKind::Network,

            // Classified by what actually went wrong underneath.
            SyftError::RpcSendFailed { source, .. } => source
                .as_deref()
                .map(SyftError::kind)
                .unwrap_or(ErrorKind::Network),

            SyftError::MalformedFrame { .. }
            | SyftError::Json { .. }
            | SyftError::Config { .. }
            | SyftError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            SyftError::Authentication { .. } => "AUTHENTICATION_FAILED",
            SyftError::WebSocketAuthenticationFailed { .. } => "WEBSOCKET_AUTHENTICATION_FAILED",
            SyftError::ConnectionFailed { .. } => "WEBSOCKET_CONNECTION_FAILED",
            SyftError::SendFailed { .. } => "WEBSOCKET_SEND_FAILED",
            SyftError::MalformedFrame { .. } => "WEBSOCKET_MALFORMED_FRAME",
            SyftError::Network { .. } => "NETWORK_ERROR",
            SyftError::Timeout(_) => "TIMEOUT",
            SyftError::Http { .. } => "HTTP_ERROR",
            SyftError::RpcSendFailed { .. } => "RPC_SEND_FAILED",
            SyftError::PollTimeout { .. } => "POLL_TIMEOUT",
            SyftError::PollNotFound { .. } => "POLL_NOT_FOUND",
            SyftError::PollFailed { .. } => "POLL_FAILED",
            SyftError::PollCancelled { .. } => "POLL_CANCELLED",
            SyftError::MaxPollAttemptsExceeded { .. } => "MAX_POLL_ATTEMPTS_EXCEEDED",
            SyftError::SendAndWaitTimeout { .. } => "SEND_AND_WAIT_TIMEOUT",
            SyftError::InvalidRequest { .. } => "INVALID_REQUEST",
            SyftError::InvalidSyftUrl { .. } => "INVALID_SYFT_URL",
            SyftError::Json { .. } => "JSON_ERROR",
            SyftError::Config { .. } => "CONFIG_ERROR",
            SyftError::Cancelled => "CANCELLED",
            SyftError::Other(_) => "UNKNOWN",
        }
    }

    /// Check if an HTTP-level failure should be retried.
    ///
    /// Network failures, timeouts, 429 and 5xx are retryable; every other
    /// status (notably 401, 403, 404) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyftError::Network { .. } | SyftError::Timeout(_) => true,
            SyftError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Check if this is a single poll attempt running out of time.
    pub fn is_poll_timeout(&self) -> bool {
        matches!(self, SyftError::PollTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = SyftError::PollNotFound {
            request_id: "r1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Request r1 not found (it may have expired)"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SyftError::PollCancelled {
                request_id: "r1".into()
            }
            .kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            SyftError::PollTimeout {
                request_id: "r1".into()
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            SyftError::invalid("from", "must not be empty").kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn test_rpc_send_failed_keeps_cause() {
        let err = SyftError::RpcSendFailed {
            message: "boom".into(),
            source: Some(Box::new(SyftError::Timeout(Duration::from_secs(3)))),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let cause = err.source().expect("cause preserved");
        assert_eq!(cause.to_string(), "Request timeout after 3s");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyftError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(SyftError::Http {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(SyftError::Http {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        for status in [401, 403, 404] {
            assert!(!SyftError::Http {
                status,
                message: String::new()
            }
            .is_retryable());
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            SyftError::WebSocketAuthenticationFailed {
                message: "no token".into()
            }
            .code(),
            "WEBSOCKET_AUTHENTICATION_FAILED"
        );
    }
}
