//! Error types for the managed broker session
//!
//! Every failure the session can report is local and non-fatal: connect failures resolve the
//! pending `connect()` call, operation failures are returned to the caller, and connection
//! losses are reported through the disconnect observer.

use crate::session::ConnectionState;
use crate::transport::{ConnectionLoss, TransportError};
use thiserror::Error;

/// Main error type for session operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("Connect attempt failed: {reason}")]
    ConnectFailure { reason: String },

    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("{operation} failed for topic '{topic}': {reason}")]
    OperationError {
        operation: Operation,
        topic: String,
        reason: String,
    },
}

/// Operations that are only valid while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Publish => "Publish",
            Operation::Subscribe => "Subscribe",
            Operation::Unsubscribe => "Unsubscribe",
        };
        f.write_str(name)
    }
}

impl SessionError {
    /// Create connect failure error
    pub fn connect_failure<S: Into<String>>(reason: S) -> Self {
        Self::ConnectFailure {
            reason: reason.into(),
        }
    }

    /// Create not connected error
    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    /// Create connection lost error from a loss report
    pub fn connection_lost(loss: &ConnectionLoss) -> Self {
        Self::ConnectionLost {
            reason: loss.to_string(),
        }
    }

    /// Create operation error from a transport failure
    pub fn operation(operation: Operation, topic: &str, source: &TransportError) -> Self {
        Self::OperationError {
            operation,
            topic: topic.to_string(),
            reason: source.to_string(),
        }
    }

    /// Whether a retry could succeed once the session is connected again
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        Self::ConnectFailure {
            reason: error.to_string(),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            SessionError::connect_failure("AMQJS0007E Socket error"),
            SessionError::not_connected(ConnectionState::Reconnecting),
            SessionError::connection_lost(&ConnectionLoss::new(2, "keep-alive timeout")),
            SessionError::operation(
                Operation::Publish,
                "X1/led",
                &TransportError::RequestRejected("queue full".to_string()),
            ),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_not_connected_mentions_state() {
        let error = SessionError::not_connected(ConnectionState::Connecting);
        assert!(error.to_string().contains("Connecting"));
        assert!(error.is_not_connected());
    }

    #[test]
    fn test_operation_error_carries_topic() {
        let error = SessionError::operation(
            Operation::Subscribe,
            "X1/suhu",
            &TransportError::RequestRejected("closed".to_string()),
        );
        let message = error.to_string();
        assert!(message.starts_with("Subscribe failed"));
        assert!(message.contains("X1/suhu"));
        assert!(message.contains("closed"));
        assert!(!error.is_not_connected());
    }

    #[test]
    fn test_connection_lost_carries_code() {
        let error = SessionError::connection_lost(&ConnectionLoss::new(8, "socket closed"));
        assert_eq!(
            error.to_string(),
            "Connection lost: socket closed (code 8)"
        );
    }

    #[test]
    fn test_transport_error_converts_to_connect_failure() {
        let error: SessionError = TransportError::Timeout(10).into();
        assert!(matches!(error, SessionError::ConnectFailure { .. }));
    }
}
