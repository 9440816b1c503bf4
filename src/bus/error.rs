//! Error types for message bus operations.
//!
//! This module defines errors for:
//! - Connecting to the broker
//! - Publishing, subscribing and request/reply exchanges
//! - Reply envelope encoding and remote-reported failures

use thiserror::Error;

/// Errors from message bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Failed to establish the broker connection.
    #[error("Failed to connect to message bus at {servers}: {message}")]
    Connect {
        /// The server list we tried to connect to.
        servers: String,
        /// Error message from the client library.
        message: String,
    },

    /// Failed to publish a message.
    #[error("Failed to publish on '{subject}': {message}")]
    Publish {
        /// Subject the message was addressed to.
        subject: String,
        /// Error message from the client library.
        message: String,
    },

    /// Failed to subscribe to a subject pattern.
    #[error("Failed to subscribe to '{pattern}': {message}")]
    Subscribe {
        /// The subject pattern.
        pattern: String,
        /// Error message from the client library.
        message: String,
    },

    /// A request did not receive a reply in time.
    #[error("Request on '{0}' timed out")]
    Timeout(String),

    /// Nobody is subscribed to the request subject.
    #[error("No responders for '{0}'")]
    NoResponders(String),

    /// The bus could not carry the request.
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// The responder reported a failure in its reply envelope.
    #[error("Remote failure: {0}")]
    Remote(String),

    /// Reply envelope or structured payload could not be encoded/decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BusError {
    /// Whether the error means the request never reached a live peer
    /// (timeout, no responders, transport failure).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BusError::Timeout(_) | BusError::NoResponders(_) | BusError::Unavailable(_)
        )
    }
}

/// Result type for message bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error() {
        let err = BusError::Timeout("tunnel.open".to_string());
        assert!(err.to_string().contains("tunnel.open"));
        assert!(err.is_transport());
    }

    #[test]
    fn test_remote_error_is_not_transport() {
        let err = BusError::Remote("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_connect_error() {
        let err = BusError::Connect {
            servers: "localhost:4222".to_string(),
            message: "refused".to_string(),
        };
        assert!(err.to_string().contains("localhost:4222"));
    }

    #[test]
    fn test_codec_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BusError = json_err.into();
        assert!(matches!(err, BusError::Codec(_)));
    }
}
