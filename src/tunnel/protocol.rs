//! Control payloads exchanged on the tunnel's subjects.
//!
//! Control messages are JSON; data messages are raw bytes and have no
//! type here.
//!
//! ```json
//! open request:  {"host":"example.org","port":80}
//! open reply:    {"socketId":7}
//! close notice:  {}
//! ready notice:  {}
//! ```

use serde::{Deserialize, Serialize};

use super::connection::ConnectionId;
use crate::socks::host_port;

/// Request sent to `<prefix>.open` asking the egress to dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Destination host name or IP literal.
    pub host: String,
    /// Destination TCP port.
    pub port: u16,
}

impl OpenRequest {
    /// Build a request for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Destination formatted as `host:port`.
    pub fn addr(&self) -> String {
        host_port(&self.host, self.port)
    }
}

/// Reply to a successful open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    /// Identifier the egress registered the dialed socket under.
    #[serde(rename = "socketId", default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<ConnectionId>,
}

impl OpenReply {
    /// Reply carrying `id`.
    pub fn opened(id: ConnectionId) -> Self {
        Self { socket_id: Some(id) }
    }
}

/// Body of a close notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseNotice {}

/// Body of a ready notification, sent by the ingress once the client
/// socket is registered and answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyNotice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_wire_format() {
        let json = serde_json::to_string(&OpenRequest::new("example.org", 80)).unwrap();
        assert_eq!(json, r#"{"host":"example.org","port":80}"#);
    }

    #[test]
    fn test_open_reply_wire_format() {
        let json = serde_json::to_string(&OpenReply::opened(ConnectionId::new(7))).unwrap();
        assert_eq!(json, r#"{"socketId":7}"#);

        let empty: OpenReply = serde_json::from_str("{}").unwrap();
        assert!(empty.socket_id.is_none());
    }

    #[test]
    fn test_close_notice_wire_format() {
        assert_eq!(serde_json::to_string(&CloseNotice::default()).unwrap(), "{}");
    }

    #[test]
    fn test_addr_formatting() {
        assert_eq!(OpenRequest::new("example.org", 80).addr(), "example.org:80");
        assert_eq!(OpenRequest::new("::1", 443).addr(), "[::1]:443");
    }
}
