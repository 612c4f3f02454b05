use crate::protocol::ValidationError;
use thiserror::Error;

/// Main error type for meshwire
///
/// Variants carry rendered strings rather than source errors so the type
/// stays `Clone`: the worker thread hands the same failure to the blocked
/// `connect()` caller, the `on_error` callback and the event channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// Address resolution, TCP connect or stream setup failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the connection or the socket was shut down
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Server rejected the credential (never retried)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connect did not complete in time
    #[error("Connect timed out: {0}")]
    ConnectTimeout(String),

    /// No response frame within the read timeout
    #[error("Read timed out: {0}")]
    ReadTimeout(String),

    /// Frame could not be written within the write timeout
    #[error("Write timed out: {0}")]
    WriteTimeout(String),

    /// Message failed structural validation
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// Bounded queue is at capacity
    #[error("Queue is full")]
    QueueFull,

    /// Bounded queue was closed
    #[error("Queue is closed")]
    QueueClosed,

    /// Timed dequeue expired without an item
    #[error("Timed out waiting for a queued item")]
    QueueTimeout,

    /// Retry policy gave up after the configured number of attempts
    #[error("Giving up after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// Retry policy exhausted its overall time budget
    #[error("Retry budget of {budget_ms}ms exhausted after {attempts} attempts: {last_error}")]
    RetryTimeout {
        attempts: u32,
        budget_ms: u64,
        last_error: String,
    },

    /// Peer violated the wire protocol
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A size or resource limit was hit
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Repair of an invalid message failed; the last good snapshot was restored
    #[error("Recovery failed after {attempts} attempts: {reason}")]
    RecoveryFailed { attempts: u32, reason: String },

    /// Metric name already present in the registry
    #[error("Metric already registered: {0}")]
    MetricAlreadyRegistered(String),

    /// Malformed metric name or bucket layout
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Operation aborted because the client is shutting down
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl MeshError {
    /// Whether the connect path should try again after this error
    ///
    /// Authentication failures, invalid input and local shutdown are final;
    /// transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshError::ConnectionFailed(_)
                | MeshError::ConnectionClosed(_)
                | MeshError::ConnectTimeout(_)
                | MeshError::ReadTimeout(_)
                | MeshError::WriteTimeout(_)
                | MeshError::ProtocolError(_)
                | MeshError::Tls(_)
                | MeshError::QueueFull
        )
    }

    /// Whether this error means the session's stream is no longer usable
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            MeshError::ConnectionFailed(_)
                | MeshError::ConnectionClosed(_)
                | MeshError::ReadTimeout(_)
                | MeshError::WriteTimeout(_)
                | MeshError::ProtocolError(_)
                | MeshError::ResourceExhausted(_)
                | MeshError::Compression(_)
                | MeshError::Tls(_)
        )
    }
}

/// Result type for meshwire operations
pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_is_final() {
        assert!(!MeshError::AuthenticationFailed("bad token".into()).is_retryable());
        assert!(!MeshError::Cancelled("shutdown".into()).is_retryable());
        assert!(!MeshError::InvalidMessage(ValidationError::EmptySourceId).is_retryable());
    }

    #[test]
    fn test_transport_failures_retry() {
        assert!(MeshError::ConnectionFailed("refused".into()).is_retryable());
        assert!(MeshError::ConnectTimeout("1s".into()).is_retryable());
        assert!(MeshError::ReadTimeout("1s".into()).is_io_failure());
    }

    #[test]
    fn test_display_includes_attempts() {
        let err = MeshError::MaxRetriesExceeded {
            attempts: 3,
            last_error: "refused".into(),
        };
        assert_eq!(err.to_string(), "Giving up after 3 attempts: refused");
    }
}
