//! Connection teardown and close notification.
//!
//! Teardown removes the registry entry, which is the single point that
//! decides whether a call has any effect. Whoever removes the entry owns
//! the follow-up:
//!
//! - local closure (EOF, read error, failed forward): tear down, then tell
//!   the peer on `<prefix>.sockets.<id>.<publish key>.close`
//! - remote closure: tear down only, never echo a notification back

use serde::de::IgnoredAny;
use tracing::{debug, trace};

use super::connection::{ConnectionId, Direction};
use super::dataplane::DataPlane;
use super::protocol::CloseNotice;
use crate::bus::MessageBus;

impl<B: MessageBus> DataPlane<B> {
    /// Release the local state of `id`.
    ///
    /// Returns `true` if this call removed the connection, `false` if it was
    /// already gone. A second call has no side effects.
    pub fn teardown(&self, id: ConnectionId) -> bool {
        let Some(connection) = self.registry.remove(id) else {
            trace!(%id, "Connection already torn down");
            return false;
        };

        connection.signal_shutdown();
        let info = connection.info(id);
        drop(connection);

        debug!(
            %id,
            direction = %info.direction,
            age_ms = info.age.as_millis() as u64,
            sent = info.bytes_sent,
            received = info.bytes_received,
            remaining = ?self.registry.ids(),
            "Connection torn down"
        );
        true
    }

    /// Handle a locally detected closure: tear down and notify the peer.
    ///
    /// The peer is only notified if this call performed the teardown.
    pub async fn close_local(&self, id: ConnectionId, direction: Direction) {
        if self.teardown(id) {
            self.notify_close(id, direction).await;
        }
    }

    /// Tell the peer that `id` is closed on this side.
    ///
    /// Best effort: failures are logged and swallowed, the peer falls back
    /// on its own socket error detection.
    pub async fn notify_close(&self, id: ConnectionId, direction: Direction) {
        let subject = self.subjects.close(id, direction.publish_key());
        match self
            .bridge
            .fire_rpc::<_, IgnoredAny>(&subject, &CloseNotice::default())
            .await
        {
            Ok(_) => trace!(%id, "Peer acknowledged close"),
            Err(e) => debug!(%id, error = %e, "Close notification not acknowledged"),
        }
    }

    /// Handle a close notification received on `subject`.
    ///
    /// Unknown identifiers are ignored.
    pub fn handle_remote_close(&self, subject: &str) -> bool {
        match self.subjects.connection_id(subject) {
            Some(id) => {
                debug!(%id, "Peer closed connection");
                self.teardown(id)
            }
            None => {
                trace!(subject, "Close on unrecognised subject ignored");
                false
            }
        }
    }

    /// Tear down every connection and notify the peer of each.
    pub async fn close_all(&self) {
        let connections = self.registry.drain();
        if connections.is_empty() {
            return;
        }
        debug!(count = connections.len(), "Closing all connections");

        for (id, connection) in connections {
            let direction = connection.direction();
            connection.signal_shutdown();
            drop(connection);
            self.notify_close(id, direction).await;
        }
    }
}
