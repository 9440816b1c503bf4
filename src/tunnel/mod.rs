//! TCP tunnelling over a request/reply bus.
//!
//! Two processes share a subject prefix. The ingress accepts SOCKS5
//! clients; the egress dials their destinations. Every byte in between
//! travels as a bus request.
//!
//! ```text
//!  client ─► Ingress ─── <prefix>.open ───────────────────► Egress ─► destination
//!              │                                              │
//!              ├─ sockets.<id>.output.data / .close ─────────►│
//!              │◄──────── sockets.<id>.input.data / .close ───┤
//!              ▼                                              ▼
//!          DataPlane (Registry, Inbound)          DataPlane (Registry, Outbound)
//! ```
//!
//! # Modules
//!
//! - [`connection`]: identifiers, directions and per-connection state
//! - [`subjects`]: subject naming
//! - [`protocol`]: JSON control payloads
//! - [`registry`]: live connection table
//! - [`dataplane`]: forwarding, delivery and teardown
//! - [`ingress`] / [`egress`]: the two roles

pub mod connection;
pub mod dataplane;
pub mod egress;
pub mod error;
pub mod ingress;
mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod subjects;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionStats, Direction, DirectionKey};
pub use dataplane::{DataPlane, READ_BUFFER_SIZE};
pub use egress::Egress;
pub use error::{TunnelError, TunnelResult};
pub use ingress::Ingress;
pub use protocol::{CloseNotice, OpenReply, OpenRequest, ReadyNotice};
pub use registry::Registry;
pub use subjects::Subjects;
