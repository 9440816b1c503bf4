//! SOCKS5 front door for the ingress side.
//!
//! Only what a tunnelling proxy needs: the CONNECT command, no
//! authentication, and IPv4, IPv6 or domain destinations.
//!
//! ```text
//!  client ──TCP──▶ Socks5Server ──handshake──▶ Negotiation
//!                                                 │
//!                        handler decides ◀────────┘
//!                   accept() ─▶ TcpStream   deny(code) ─▶ failure reply
//! ```

pub mod error;
pub mod protocol;
pub mod server;

pub use error::{SocksError, SocksResult};
pub use protocol::{Destination, ReplyCode, host_port};
pub use server::{DEFAULT_HANDSHAKE_TIMEOUT, ListenerConfig, Negotiation, Socks5Server};
