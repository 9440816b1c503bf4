//! Subject namespace for one tunnel.
//!
//! ```text
//! <prefix>.open                                   control channel
//! <prefix>.sockets.<id>.<input|output>.data       raw bytes
//! <prefix>.sockets.<id>.<input|output>.close      close notification
//! <prefix>.sockets.<id>.output.ready              ingress registered the socket
//! ```

use super::connection::{ConnectionId, DirectionKey};

/// Token separating the prefix from per-connection subjects.
const SOCKETS_TOKEN: &str = "sockets";

/// Builds and parses subjects under a tunnel-wide prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    prefix: String,
}

impl Subjects {
    /// Create the namespace for `prefix` (e.g. `office.tunnel`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The tunnel-wide prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Control subject answered by the egress.
    pub fn open(&self) -> String {
        format!("{}.open", self.prefix)
    }

    /// Data subject for one connection.
    pub fn data(&self, id: ConnectionId, key: DirectionKey) -> String {
        format!("{}.{}.{}.{}.data", self.prefix, SOCKETS_TOKEN, id, key)
    }

    /// Close-notification subject for one connection.
    pub fn close(&self, id: ConnectionId, key: DirectionKey) -> String {
        format!("{}.{}.{}.{}.close", self.prefix, SOCKETS_TOKEN, id, key)
    }

    /// Subject announcing that the sender registered connection `id`.
    pub fn ready(&self, id: ConnectionId, key: DirectionKey) -> String {
        format!("{}.{}.{}.{}.ready", self.prefix, SOCKETS_TOKEN, id, key)
    }

    /// Pattern matching every connection's ready subject for `key`.
    pub fn ready_pattern(&self, key: DirectionKey) -> String {
        format!("{}.{}.*.{}.ready", self.prefix, SOCKETS_TOKEN, key)
    }

    /// Pattern matching every connection's data subject for `key`.
    pub fn data_pattern(&self, key: DirectionKey) -> String {
        format!("{}.{}.*.{}.data", self.prefix, SOCKETS_TOKEN, key)
    }

    /// Pattern matching every connection's close subject for `key`.
    pub fn close_pattern(&self, key: DirectionKey) -> String {
        format!("{}.{}.*.{}.close", self.prefix, SOCKETS_TOKEN, key)
    }

    /// Extract the connection identifier from a concrete socket subject.
    ///
    /// Returns `None` for subjects outside this namespace or with a
    /// non-numeric identifier token.
    pub fn connection_id(&self, subject: &str) -> Option<ConnectionId> {
        let rest = subject
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('.')?;
        let mut tokens = rest.split('.');
        if tokens.next()? != SOCKETS_TOKEN {
            return None;
        }
        tokens.next()?.parse().ok()
    }
}
