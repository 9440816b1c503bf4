//! Egress role: bus in, destination sockets out.

use serde::de::IgnoredAny;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connection::Direction;
use super::dataplane::DataPlane;
use super::error::{TunnelError, TunnelResult};
use super::protocol::{OpenReply, OpenRequest};
use crate::bus::{BusResult, MessageBus, RequestContext};

/// The egress side of a tunnel.
pub struct Egress<B> {
    plane: Arc<DataPlane<B>>,
}

impl<B: MessageBus> Egress<B> {
    /// Wrap a data plane.
    pub fn new(plane: Arc<DataPlane<B>>) -> Self {
        Self { plane }
    }

    /// The shared data plane.
    pub fn plane(&self) -> &Arc<DataPlane<B>> {
        &self.plane
    }

    /// Subscribe to the ingress's data, close and ready subjects, then
    /// start answering open requests.
    ///
    /// Connection subjects are served first so the ingress can never send
    /// anything for a connection before this side listens for it.
    pub async fn serve(self: &Arc<Self>) -> BusResult<Vec<JoinHandle<()>>> {
        let mut handles = self.plane.serve(Direction::Outbound).await?;

        let plane = Arc::clone(&self.plane);
        let ready = self
            .plane
            .bridge
            .respond_json(
                &self
                    .plane
                    .subjects
                    .ready_pattern(Direction::Outbound.subscribe_key()),
                move |_notice: IgnoredAny, context: RequestContext| {
                    let plane = Arc::clone(&plane);
                    async move {
                        plane.handle_ready(&context.subject);
                        Ok::<_, TunnelError>(())
                    }
                },
            )
            .await?;
        handles.push(ready);

        let egress = Arc::clone(self);
        let open = self
            .plane
            .bridge
            .respond_json(
                &self.plane.subjects.open(),
                move |request: OpenRequest, _context: RequestContext| {
                    let egress = Arc::clone(&egress);
                    async move { egress.open(request).await }
                },
            )
            .await?;
        handles.push(open);

        debug!(subject = %self.plane.subjects.open(), "Answering open requests");
        Ok(handles)
    }

    /// Dial the requested destination and register the socket.
    ///
    /// The socket is not read until the ingress reports it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Dial`] if the destination cannot be reached.
    pub async fn open(&self, request: OpenRequest) -> TunnelResult<OpenReply> {
        let stream = TcpStream::connect((request.host.as_str(), request.port))
            .await
            .map_err(|source| TunnelError::Dial {
                addr: request.addr(),
                source,
            })?;

        let id = self.plane.registry.allocate_id();
        self.plane.attach_held(id, Direction::Outbound, stream).await?;

        info!(%id, destination = %request.addr(), "Connection opened");
        Ok(OpenReply::opened(id))
    }
}
