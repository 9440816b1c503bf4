//! Error types for the SOCKS5 listener.

use thiserror::Error;

/// Errors from SOCKS5 negotiation and listening.
#[derive(Debug, Error)]
pub enum SocksError {
    /// Failed to bind the proxy listener.
    #[error("Failed to bind SOCKS5 listener on {addr}: {source}")]
    Bind {
        /// The address we tried to bind to.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The client spoke a different protocol version.
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// The client offered no method we accept.
    #[error("No acceptable authentication method offered")]
    NoAcceptableAuth,

    /// The client asked for something other than CONNECT.
    #[error("Unsupported SOCKS command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// The destination used an unknown address type.
    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// The destination domain was empty or not UTF-8.
    #[error("Invalid destination domain")]
    InvalidDomain,

    /// The client did not finish the handshake in time.
    #[error("SOCKS5 handshake timed out")]
    HandshakeTimeout,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for SOCKS5 operations.
pub type SocksResult<T> = Result<T, SocksError>;
