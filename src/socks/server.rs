//! SOCKS5 listener.
//!
//! Accepts TCP clients, runs the handshake under a timeout, and hands each
//! negotiated request to a caller-supplied handler as a [`Negotiation`]. The
//! handler decides whether to [`accept`](Negotiation::accept) the request
//! (success reply, stream returned), [`grant`](Negotiation::grant) it
//! (stream returned, reply left to the caller) or [`deny`](Negotiation::deny) it.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{SocksError, SocksResult};
use super::protocol::{Destination, ReplyCode, encode_reply, read_request, send_reply};

/// Default time a client gets to complete the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Host or address to bind.
    pub address: String,
    /// Port to bind (0 picks an ephemeral port).
    pub port: u16,
    /// Handshake deadline per client.
    pub handshake_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 1080,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// A client whose handshake completed and who is waiting for a reply.
#[derive(Debug)]
pub struct Negotiation {
    stream: TcpStream,
    peer: SocketAddr,
    destination: Destination,
}

impl Negotiation {
    /// The destination the client asked for.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The client's address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send the success reply and return the raw stream.
    pub async fn accept(self) -> SocksResult<TcpStream> {
        let (mut stream, reply) = self.grant();
        stream.write_all(&reply).await?;
        Ok(stream)
    }

    /// Return the raw stream with the success reply still unsent.
    ///
    /// The caller must write `reply` before anything else.
    pub fn grant(self) -> (TcpStream, Vec<u8>) {
        let bound = self.stream.local_addr().ok();
        (self.stream, encode_reply(ReplyCode::Succeeded, bound))
    }

    /// Send a failure reply and drop the client.
    pub async fn deny(mut self, code: ReplyCode) {
        if let Err(e) = send_reply(&mut self.stream, code, None).await {
            debug!(peer = %self.peer, "Failed to send SOCKS5 failure reply: {}", e);
        }
    }
}

/// A bound SOCKS5 listener.
pub struct Socks5Server {
    listener: TcpListener,
    handshake_timeout: Duration,
}

impl Socks5Server {
    /// Bind the listener.
    pub async fn bind(config: &ListenerConfig) -> SocksResult<Self> {
        let addr = format!("{}:{}", config.address, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| SocksError::Bind { addr, source })?;

        Ok(Self {
            listener,
            handshake_timeout: config.handshake_timeout,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocksResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the shutdown signal fires.
    ///
    /// Each client runs in its own task: handshake first, then `handler`.
    /// Clients that fail the handshake are logged and dropped.
    pub async fn run<H, Fut>(self, mut shutdown_rx: watch::Receiver<bool>, handler: H)
    where
        H: Fn(Negotiation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!("SOCKS5 proxy listening on {}", addr);
        }

        let handler = Arc::new(handler);
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Accepted SOCKS5 client");
                            let handler = handler.clone();
                            let timeout = self.handshake_timeout;
                            tokio::spawn(async move {
                                match handshake(stream, peer, timeout).await {
                                    Ok(negotiation) => handler(negotiation).await,
                                    Err(e) => debug!(%peer, "SOCKS5 handshake failed: {}", e),
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("SOCKS5 proxy shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn handshake(
    mut stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
) -> SocksResult<Negotiation> {
    let destination = tokio::time::timeout(timeout, read_request(&mut stream))
        .await
        .map_err(|_| SocksError::HandshakeTimeout)??;

    Ok(Negotiation {
        stream,
        peer,
        destination,
    })
}
