//! Data-plane forwarding for registered connections.
//!
//! # Flow
//!
//! ```text
//!  local socket ──read──► forward_local ──fire_rpc_raw──► <prefix>.sockets.<id>.<publish key>.data
//!                              ▲   one request in flight          │
//!                              └──────── ack ◄────────────────────┘
//!
//!  <prefix>.sockets.*.<subscribe key>.data ──► deliver ──write_all──► local socket
//! ```
//!
//! The reader only reads the next chunk after the peer acknowledged that
//! the previous one was written. That gate keeps bytes in order on an
//! unordered bus and bounds buffering to one chunk per connection.
//!
//! The egress holds each new reader until the ingress reports on
//! `<prefix>.sockets.<id>.output.ready` that the client socket is
//! registered, so a destination that speaks first is not read into a
//! peer that would drop the bytes as unknown.

use bytes::Bytes;
use serde::de::IgnoredAny;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::connection::{Connection, ConnectionId, ConnectionStats, Direction};
use super::error::{TunnelError, TunnelResult};
use super::registry::Registry;
use super::subjects::Subjects;
use crate::bus::{BusBridge, BusResult, MessageBus, RequestContext};

/// Size of a single read from a local socket.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long a held reader waits for the peer's ready notification.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-process tunnel state shared by both roles.
///
/// Owns the registry and the bus bridge; [`Ingress`](super::Ingress) and
/// [`Egress`](super::Egress) only decide when connections are attached.
pub struct DataPlane<B> {
    pub(super) bridge: BusBridge<B>,
    pub(super) subjects: Subjects,
    pub(super) registry: Registry,
}

impl<B: MessageBus> DataPlane<B> {
    /// Create the data plane for one tunnel prefix.
    pub fn new(bus: B, subjects: Subjects) -> Self {
        Self {
            bridge: BusBridge::new(bus),
            subjects,
            registry: Registry::new(),
        }
    }

    /// The request/reply bridge.
    pub fn bridge(&self) -> &BusBridge<B> {
        &self.bridge
    }

    /// The subject namespace.
    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    /// The connection registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Subscribe to the peer's data and close subjects for `direction`.
    ///
    /// Must run before any connection of that direction is attached so no
    /// message addressed to this side is missed.
    pub async fn serve(self: &Arc<Self>, direction: Direction) -> BusResult<Vec<JoinHandle<()>>> {
        let key = direction.subscribe_key();

        let plane = Arc::clone(self);
        let data = self
            .bridge
            .respond_raw(
                &self.subjects.data_pattern(key),
                move |payload: Bytes, context: RequestContext| {
                    let plane = Arc::clone(&plane);
                    async move { plane.deliver(&context.subject, payload).await }
                },
            )
            .await?;

        let plane = Arc::clone(self);
        let close = self
            .bridge
            .respond_json(
                &self.subjects.close_pattern(key),
                move |_notice: IgnoredAny, context: RequestContext| {
                    let plane = Arc::clone(&plane);
                    async move {
                        plane.handle_remote_close(&context.subject);
                        Ok::<_, TunnelError>(())
                    }
                },
            )
            .await?;

        debug!(key = %key, "Serving peer subjects");
        Ok(vec![data, close])
    }

    /// Register `stream` under `id` and start relaying its bytes to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::IdCollision`] if `id` is already live; the
    /// stream is closed and the existing connection is untouched.
    pub async fn attach(
        self: &Arc<Self>,
        id: ConnectionId,
        direction: Direction,
        stream: TcpStream,
    ) -> TunnelResult<()> {
        self.register(id, direction, stream, &[], None).await
    }

    /// Like [`attach`](Self::attach), but write `greeting` to the socket
    /// before any byte delivered by the peer.
    ///
    /// The writer stays locked from registration until the greeting is out,
    /// so data the peer sends early waits instead of overtaking it.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::SocketWrite`] if the greeting cannot be
    /// written; the connection is torn down without notifying the peer.
    pub async fn attach_with_greeting(
        self: &Arc<Self>,
        id: ConnectionId,
        direction: Direction,
        stream: TcpStream,
        greeting: &[u8],
    ) -> TunnelResult<()> {
        self.register(id, direction, stream, greeting, None).await
    }

    /// Like [`attach`](Self::attach), but the socket is not read until the
    /// peer announces on the ready subject that it registered `id`.
    ///
    /// Bytes the local end sends first stay in the socket instead of
    /// reaching a peer that could not yet place them. A reader still held
    /// after [`READY_TIMEOUT`] closes the connection.
    pub async fn attach_held(
        self: &Arc<Self>,
        id: ConnectionId,
        direction: Direction,
        stream: TcpStream,
    ) -> TunnelResult<()> {
        let (start_tx, start_rx) = oneshot::channel();
        self.register(id, direction, stream, &[], Some((start_tx, start_rx)))
            .await
    }

    async fn register(
        self: &Arc<Self>,
        id: ConnectionId,
        direction: Direction,
        stream: TcpStream,
        greeting: &[u8],
        hold: Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>,
    ) -> TunnelResult<()> {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(%id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ConnectionStats::default());
        let mut connection = Connection::new(direction, writer, shutdown_tx, Arc::clone(&stats));
        let start_rx = hold.map(|(start_tx, start_rx)| {
            connection.hold_reader(start_tx);
            start_rx
        });

        let mut socket = connection.writer().lock_owned().await;
        self.registry.insert(id, connection)?;
        debug!(%id, %direction, held = start_rx.is_some(), open = ?self.registry.ids(), "Connection attached");

        if !greeting.is_empty()
            && let Err(source) = socket.write_all(greeting).await
        {
            drop(socket);
            self.teardown(id);
            return Err(TunnelError::SocketWrite { id, source });
        }
        drop(socket);

        let plane = Arc::clone(self);
        tokio::spawn(async move {
            plane
                .forward_local(id, direction, reader, shutdown_rx, start_rx, stats)
                .await;
        });

        Ok(())
    }

    /// Start the held reader of the connection named by a ready `subject`.
    ///
    /// Unknown connections are ignored, like late data.
    pub fn handle_ready(&self, subject: &str) -> bool {
        match self.subjects.connection_id(subject) {
            Some(id) => {
                let released = self.registry.release(id);
                trace!(%id, released, "Peer ready");
                released
            }
            None => {
                trace!(subject, "Ready on unrecognised subject ignored");
                false
            }
        }
    }

    /// Relay bytes read from the local socket to the peer until either side
    /// closes.
    async fn forward_local(
        self: Arc<Self>,
        id: ConnectionId,
        direction: Direction,
        mut reader: OwnedReadHalf,
        mut shutdown_rx: watch::Receiver<bool>,
        start_rx: Option<oneshot::Receiver<()>>,
        stats: Arc<ConnectionStats>,
    ) {
        if let Some(start_rx) = start_rx {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    trace!(%id, "Held reader stopped by teardown");
                    return;
                }
                started = start_rx => {
                    if started.is_err() {
                        trace!(%id, "Held reader dropped by teardown");
                        return;
                    }
                }
                _ = tokio::time::sleep(READY_TIMEOUT) => {
                    warn!(%id, "Peer never confirmed the connection, closing");
                    self.close_local(id, direction).await;
                    return;
                }
            }
        }

        let subject = self.subjects.data(id, direction.publish_key());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    trace!(%id, "Reader stopped by teardown");
                    return;
                }
                result = reader.read(&mut buf) => result,
            };

            match read {
                Ok(0) => {
                    debug!(%id, "Local socket closed");
                    break;
                }
                Ok(n) => {
                    trace!(%id, bytes = n, "Forwarding chunk");
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    match self.bridge.fire_rpc_raw::<IgnoredAny>(&subject, chunk).await {
                        Ok(_) => stats.add_sent(n),
                        Err(e) => {
                            warn!(%id, error = %e, "Forwarding failed, closing connection");
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!(%id, error = %e, "Local socket read failed");
                    break;
                }
            }
        }

        self.close_local(id, direction).await;
    }

    /// Write bus-delivered bytes into the local socket named by `subject`.
    ///
    /// Completes only once the socket accepted the bytes, which is what the
    /// sender's acknowledgement waits on. Data for an unknown connection is
    /// an expected teardown race and succeeds without effect.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::SocketWrite`] if the write fails; the
    /// connection is torn down first.
    pub async fn deliver(&self, subject: &str, payload: Bytes) -> TunnelResult<()> {
        let Some(id) = self.subjects.connection_id(subject) else {
            trace!(subject, "Data on unrecognised subject ignored");
            return Ok(());
        };
        let Some((writer, stats)) = self.registry.writer(id) else {
            trace!(%id, "Data for unknown connection ignored");
            return Ok(());
        };

        let written = {
            let mut socket = writer.lock().await;
            socket.write_all(&payload).await
        };

        match written {
            Ok(()) => {
                stats.add_received(payload.len());
                Ok(())
            }
            Err(source) => {
                warn!(%id, error = %source, "Local socket write failed");
                self.teardown(id);
                Err(TunnelError::SocketWrite { id, source })
            }
        }
    }
}
