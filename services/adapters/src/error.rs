//! Error types for the adapters module

use thiserror::Error;
use types::{Platform, TargetError};

/// Result type alias for adapter and lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Main error type for adapter and lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Something the adapter needs locally is missing; retrying cannot help
    #[error("Precondition failed for {platform}: {reason}")]
    Precondition {
        /// The platform whose adapter cannot run
        platform: Platform,
        /// What is missing
        reason: String,
    },

    /// The platform rejected the handshake
    #[error("Handshake failed for {platform}: {reason}")]
    Handshake {
        /// The platform that rejected us
        platform: Platform,
        /// Rejection reason reported by the client
        reason: String,
    },

    /// The handshake did not settle within the platform timeout
    #[error("Handshake timeout for {platform} after {timeout_ms}ms")]
    HandshakeTimeout {
        /// The platform that timed out
        platform: Platform,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A live connection went away
    #[error("Connection to {platform} dropped: {reason}")]
    Dropped {
        /// The platform whose connection dropped
        platform: Platform,
        /// Reason reported by the client
        reason: String,
    },

    /// A reconnect attempt failed to come up
    #[error("Reconnect to {platform} failed during bring-up: {reason}")]
    UnstableBringUp {
        /// The platform that failed to come back
        platform: Platform,
        /// Reason reported by the client
        reason: String,
    },

    /// The platform is throttling us
    #[error("Rate limited by {platform}: {reason}")]
    RateLimited {
        /// The platform that rate limited us
        platform: Platform,
        /// Reason reported by the client
        reason: String,
    },

    /// Retry budget exhausted
    #[error("Max reconnect attempts exceeded ({max_attempts}) for {platform}: {reason}")]
    RetriesExhausted {
        /// The platform that failed to reconnect
        platform: Platform,
        /// Maximum attempts that were tried
        max_attempts: u32,
        /// Reason of the last drop
        reason: String,
    },

    /// `disconnect()` won against an in-flight connect
    #[error("Connection to {platform} cancelled by disconnect")]
    Cancelled {
        /// The platform whose connect was cancelled
        platform: Platform,
    },

    /// A connect was requested while one is already running
    #[error("Connection to {platform} is already active")]
    AlreadyActive {
        /// The platform with the running connection
        platform: Platform,
    },

    /// The lifecycle task is gone
    #[error("Lifecycle manager for {platform} is no longer running")]
    ManagerStopped {
        /// The platform whose manager stopped
        platform: Platform,
    },

    /// The raw target could not be normalized
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),

    /// Platform client library failure outside the handshake
    #[error("Client error: {0}")]
    Client(String),

    /// Vendor payload could not be translated
    #[error("Parse error for {platform}: {message} - {error}")]
    ParseError {
        /// The platform that sent the payload
        platform: Platform,
        /// Description of what was being parsed
        message: String,
        /// Underlying error message
        error: String,
    },

    /// JSON parsing error from a vendor payload
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error during network operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error in adapter settings
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    /// Check if this error is recoverable through retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Dropped { .. }
                | LifecycleError::HandshakeTimeout { .. }
                | LifecycleError::WebSocket(_)
                | LifecycleError::Io(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            LifecycleError::Precondition { .. }
                | LifecycleError::InvalidTarget(_)
                | LifecycleError::Configuration(_)
                | LifecycleError::RetriesExhausted { .. }
                | LifecycleError::UnstableBringUp { .. }
        )
    }

    /// Whether hitting this error spends one unit of the retry budget
    pub fn consumes_retry(&self) -> bool {
        !matches!(
            self,
            LifecycleError::Precondition { .. }
                | LifecycleError::InvalidTarget(_)
                | LifecycleError::Configuration(_)
                | LifecycleError::Cancelled { .. }
                | LifecycleError::AlreadyActive { .. }
        )
    }

    /// The client-reported reason without the error prefix
    pub fn reason_text(&self) -> String {
        match self {
            LifecycleError::Precondition { reason, .. }
            | LifecycleError::Handshake { reason, .. }
            | LifecycleError::Dropped { reason, .. }
            | LifecycleError::UnstableBringUp { reason, .. }
            | LifecycleError::RateLimited { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_is_permanent_and_free() {
        let err = LifecycleError::Precondition {
            platform: Platform::Kick,
            reason: "no browser found".into(),
        };
        assert!(err.is_permanent());
        assert!(!err.is_recoverable());
        assert!(!err.consumes_retry());
        assert_eq!(err.reason_text(), "no browser found");
    }

    #[test]
    fn exhausted_message_names_the_budget() {
        let err = LifecycleError::RetriesExhausted {
            platform: Platform::Twitch,
            max_attempts: 5,
            reason: "network error".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Max reconnect attempts exceeded"));
        assert!(text.contains("(5)"));
        assert_eq!(err.reason_text(), text);
    }

    #[test]
    fn drops_are_recoverable() {
        let err = LifecycleError::Dropped {
            platform: Platform::YouTube,
            reason: "socket closed".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.consumes_retry());
    }
}
