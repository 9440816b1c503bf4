//! Process orchestration for both tunnel roles.
//!
//! Connects to the bus, starts the role, waits for Ctrl-C, then tears
//! every open connection down so the peer is not left with half-open
//! sockets.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::bus::{MessageBus, NatsBus};
use crate::cli::Role;
use crate::config::Config;
use crate::socks::Socks5Server;
use crate::tunnel::{DataPlane, Egress, Ingress};

/// How long the SOCKS5 accept loop gets to stop after shutdown is signalled.
const LISTENER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Run `role` until interrupted.
///
/// Only a bus connection failure or a proxy bind failure is fatal.
pub fn run(role: Role, config: Config) -> Result<()> {
    build_runtime()?.block_on(async {
        let bus = NatsBus::connect(&config.nats_options())
            .await
            .context("Failed to connect to the message bus")?;
        info!(servers = %config.bus.servers, "Connected to message bus");

        run_with_bus(role, &config, bus, shutdown_signal()).await
    })
}

/// Single-threaded runtime driving the listener, the bus and every socket.
fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

/// Run `role` over an already connected bus until `shutdown` completes.
pub async fn run_with_bus<B, S>(role: Role, config: &Config, bus: B, shutdown: S) -> Result<()>
where
    B: MessageBus,
    S: Future<Output = ()>,
{
    let plane = Arc::new(DataPlane::new(bus, config.subjects()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = match role {
        Role::Ingress => {
            let ingress = Arc::new(Ingress::new(Arc::clone(&plane)));
            ingress
                .serve()
                .await
                .context("Failed to subscribe to tunnel subjects")?;
            let server = Socks5Server::bind(&config.listener_config())
                .await
                .context("Failed to start SOCKS5 proxy")?;

            info!(subject = %plane.subjects().prefix(), "Waiting for incoming connections");
            Some(tokio::spawn(ingress.run(server, shutdown_rx)))
        }
        Role::Egress => {
            let egress = Arc::new(Egress::new(Arc::clone(&plane)));
            egress
                .serve()
                .await
                .context("Failed to subscribe to tunnel subjects")?;

            info!(subject = %plane.subjects().prefix(), "Waiting for outgoing connections");
            None
        }
    };

    shutdown.await;
    info!(%role, "Shutting down");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = listener {
        let _ = tokio::time::timeout(LISTENER_SHUTDOWN_GRACE, handle).await;
    }

    plane.close_all().await;
    debug!("All connections closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
