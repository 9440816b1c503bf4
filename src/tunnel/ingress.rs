//! Ingress role: SOCKS5 clients in, bus out.
//!
//! Each negotiated client is bridged in four steps:
//!
//! 1. ask the egress to dial the destination (`<prefix>.open`)
//! 2. refuse the client if the returned id is already live here
//! 3. register the stream, send the SOCKS5 success reply and start forwarding
//! 4. tell the egress it may start reading the destination
//!
//! Any failure after step 1 succeeded leaves a dialed socket on the egress
//! side, so the egress is told to close it.

use serde::de::IgnoredAny;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionId, Direction};
use super::dataplane::DataPlane;
use super::error::{TunnelError, TunnelResult};
use super::protocol::{OpenReply, OpenRequest, ReadyNotice};
use crate::bus::{BusError, BusResult, MessageBus};
use crate::socks::{Negotiation, ReplyCode, Socks5Server};

/// The ingress side of a tunnel.
pub struct Ingress<B> {
    plane: Arc<DataPlane<B>>,
}

impl<B: MessageBus> Ingress<B> {
    /// Wrap a data plane.
    pub fn new(plane: Arc<DataPlane<B>>) -> Self {
        Self { plane }
    }

    /// The shared data plane.
    pub fn plane(&self) -> &Arc<DataPlane<B>> {
        &self.plane
    }

    /// Subscribe to the egress's data and close subjects.
    pub async fn serve(&self) -> BusResult<Vec<JoinHandle<()>>> {
        self.plane.serve(Direction::Inbound).await
    }

    /// Bridge every client accepted by `server` until shutdown.
    pub async fn run(self: Arc<Self>, server: Socks5Server, shutdown_rx: watch::Receiver<bool>) {
        server
            .run(shutdown_rx, move |negotiation: Negotiation| {
                let ingress = Arc::clone(&self);
                async move {
                    let peer = negotiation.peer();
                    let destination = negotiation.destination().to_string();
                    if let Err(e) = ingress.handle(negotiation).await {
                        warn!(%peer, %destination, "Failed to open tunnel: {}", e);
                    }
                }
            })
            .await;
    }

    /// Bridge one negotiated client.
    ///
    /// On failure the client has received a SOCKS5 failure reply (or was
    /// dropped if the reply itself failed).
    pub async fn handle(&self, negotiation: Negotiation) -> TunnelResult<ConnectionId> {
        let destination = negotiation.destination().clone();
        let request = OpenRequest::new(destination.host.clone(), destination.port);

        let reply = self
            .plane
            .bridge
            .fire_rpc::<_, OpenReply>(&self.plane.subjects.open(), &request)
            .await;

        let id = match reply {
            Ok(Some(OpenReply {
                socket_id: Some(id),
            })) => id,
            Ok(_) => {
                negotiation.deny(ReplyCode::GeneralFailure).await;
                return Err(TunnelError::MissingConnectionId(request.addr()));
            }
            Err(e) => {
                let code = match e {
                    BusError::Remote(_) => ReplyCode::HostUnreachable,
                    _ => ReplyCode::GeneralFailure,
                };
                negotiation.deny(code).await;
                return Err(e.into());
            }
        };

        if self.plane.registry.contains(id) {
            negotiation.deny(ReplyCode::GeneralFailure).await;
            self.plane.notify_close(id, Direction::Inbound).await;
            return Err(TunnelError::IdCollision(id));
        }

        let (stream, greeting) = negotiation.grant();
        if let Err(e) = self
            .plane
            .attach_with_greeting(id, Direction::Inbound, stream, &greeting)
            .await
        {
            self.plane.notify_close(id, Direction::Inbound).await;
            return Err(e);
        }

        let ready = self
            .plane
            .subjects
            .ready(id, Direction::Inbound.publish_key());
        if let Err(e) = self
            .plane
            .bridge
            .fire_rpc::<_, IgnoredAny>(&ready, &ReadyNotice::default())
            .await
        {
            self.plane.close_local(id, Direction::Inbound).await;
            return Err(e.into());
        }

        info!(%id, %destination, "Connection bridged");
        debug!(open = self.plane.registry.len(), "Inbound connections");
        Ok(id)
    }
}
