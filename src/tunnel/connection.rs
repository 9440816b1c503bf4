//! Connection identity and per-connection state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, oneshot, watch};

/// Identifier of a tunneled connection.
///
/// Allocated by the egress from a monotonically increasing counter, so an
/// identifier is never handed out twice within one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Which side first owned the local socket of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted from the proxy listener (ingress side).
    Inbound,
    /// Dialed on request (egress side).
    Outbound,
}

impl Direction {
    /// Subject key this side publishes its socket's data and close events on.
    ///
    /// Always the inverse of the local role: inbound sockets feed the
    /// `output` side of the tunnel.
    pub fn publish_key(self) -> DirectionKey {
        match self {
            Direction::Inbound => DirectionKey::Output,
            Direction::Outbound => DirectionKey::Input,
        }
    }

    /// Subject key this side consumes, i.e. the peer's publish key.
    pub fn subscribe_key(self) -> DirectionKey {
        match self {
            Direction::Inbound => DirectionKey::Input,
            Direction::Outbound => DirectionKey::Output,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Subject path segment naming which side's sent data a subscriber consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKey {
    /// Data travelling towards the ingress.
    Input,
    /// Data travelling towards the egress.
    Output,
}

impl DirectionKey {
    /// Subject token for this key.
    pub fn as_str(self) -> &'static str {
        match self {
            DirectionKey::Input => "input",
            DirectionKey::Output => "output",
        }
    }
}

impl fmt::Display for DirectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared write side of a registered socket.
pub type SocketWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Byte counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Bytes read from the local socket and acknowledged by the peer.
    pub sent: AtomicU64,
    /// Bytes received from the peer and written to the local socket.
    pub received: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn add_sent(&self, n: usize) {
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Registry entry for a live connection.
///
/// Dropping the entry releases the write half; the shutdown signal stops
/// the reader task, which releases the read half.
pub struct Connection {
    direction: Direction,
    writer: SocketWriter,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<ConnectionStats>,
    start_tx: Option<oneshot::Sender<()>>,
    opened_at: Instant,
}

impl Connection {
    pub(crate) fn new(
        direction: Direction,
        writer: OwnedWriteHalf,
        shutdown_tx: watch::Sender<bool>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            direction,
            writer: Arc::new(Mutex::new(writer)),
            shutdown_tx,
            stats,
            start_tx: None,
            opened_at: Instant::now(),
        }
    }

    /// Keep the reader task waiting until [`release`](Self::release).
    pub(crate) fn hold_reader(&mut self, start_tx: oneshot::Sender<()>) {
        self.start_tx = Some(start_tx);
    }

    /// Let a held reader task start. Returns `false` if it was not held.
    pub(crate) fn release(&mut self) -> bool {
        match self.start_tx.take() {
            Some(start_tx) => start_tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Local direction of this connection.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Handle used to write bus-delivered bytes into the socket.
    pub fn writer(&self) -> SocketWriter {
        Arc::clone(&self.writer)
    }

    /// Byte counters.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Signal the reader task to stop.
    pub(crate) fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Snapshot for display.
    pub fn info(&self, id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            id,
            direction: self.direction,
            age: self.age(),
            bytes_sent: self.stats.sent.load(Ordering::Relaxed),
            bytes_received: self.stats.received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Local direction.
    pub direction: Direction,
    /// Time since registration.
    pub age: Duration,
    /// Bytes forwarded to the peer.
    pub bytes_sent: u64,
    /// Bytes written from the peer.
    pub bytes_received: u64,
}
