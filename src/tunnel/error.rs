//! Error types for tunnel operations.
//!
//! This module defines errors for:
//! - Dialing destinations on the egress
//! - Writing bus-delivered bytes into local sockets
//! - Registry conflicts
//! - Bus failures surfacing through the tunnel

use thiserror::Error;

use super::connection::ConnectionId;
use crate::bus::BusError;

/// Unified error type for tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The egress could not reach the requested destination.
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        /// Destination as `host:port`.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing into a local socket failed.
    #[error("Failed to write to connection {id}: {source}")]
    SocketWrite {
        /// Connection whose socket rejected the write.
        id: ConnectionId,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An identifier is already registered to a live connection.
    #[error("Connection {0} is already registered")]
    IdCollision(ConnectionId),

    /// The egress accepted an open request without returning an identifier.
    #[error("Open reply for {0} carried no connection identifier")]
    MissingConnectionId(String),

    /// Message bus failure.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error() {
        let err = TunnelError::Dial {
            addr: "example.org:80".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.to_string().contains("example.org:80"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_collision_error() {
        let err = TunnelError::IdCollision(ConnectionId::new(7));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_bus_error_conversion() {
        let err: TunnelError = BusError::Timeout("t.open".to_string()).into();
        assert!(matches!(err, TunnelError::Bus(BusError::Timeout(_))));
    }
}
