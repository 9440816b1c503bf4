//! NATS-backed message bus transport.
//!
//! Wraps an [`async_nats::Client`] so the tunnel can run across hosts that
//! only share a NATS broker. The broker's request timeout is the only
//! timeout on the data path.

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::{BusError, BusResult};
use super::transport::{BusMessage, MessageBus, SUBSCRIPTION_BUFFER};

/// Connection parameters for the NATS broker.
#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// Comma separated server list, e.g. `localhost:4222`.
    pub servers: String,
    /// Optional authentication token.
    pub token: Option<String>,
    /// How long a request waits for its reply.
    pub request_timeout: Duration,
    /// Client name reported to the broker.
    pub name: Option<String>,
}

/// [`MessageBus`] implementation over a NATS connection.
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] if the broker cannot be reached or
    /// rejects the credentials.
    pub async fn connect(options: &NatsOptions) -> BusResult<Self> {
        let mut connect = async_nats::ConnectOptions::new()
            .request_timeout(Some(options.request_timeout));
        if let Some(token) = &options.token {
            connect = connect.token(token.clone());
        }
        if let Some(name) = &options.name {
            connect = connect.name(name);
        }

        let client = connect
            .connect(options.servers.as_str())
            .await
            .map_err(|e| BusError::Connect {
                servers: options.servers.clone(),
                message: e.to_string(),
            })?;

        info!("Connected to NATS at {}", options.servers);
        Ok(Self { client })
    }
}

impl MessageBus for NatsBus {
    async fn publish(&self, subject: String, payload: Bytes) -> BusResult<()> {
        self.client
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| BusError::Publish {
                subject,
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, pattern: String) -> BusResult<mpsc::Receiver<BusMessage>> {
        let mut subscriber =
            self.client
                .subscribe(pattern.clone())
                .await
                .map_err(|e| BusError::Subscribe {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let message = BusMessage {
                    subject: message.subject.to_string(),
                    payload: message.payload,
                    reply: message.reply.map(|r| r.to_string()),
                };
                if tx.send(message).await.is_err() {
                    // Receiver dropped; dropping the subscriber unsubscribes.
                    break;
                }
            }
            debug!(pattern = %pattern, "NATS subscription closed");
        });

        Ok(rx)
    }

    async fn request(&self, subject: String, payload: Bytes) -> BusResult<Bytes> {
        use async_nats::RequestErrorKind;

        match self.client.request(subject.clone(), payload).await {
            Ok(message) => Ok(message.payload),
            Err(e) => Err(match e.kind() {
                RequestErrorKind::TimedOut => BusError::Timeout(subject),
                RequestErrorKind::NoResponders => BusError::NoResponders(subject),
                _ => BusError::Unavailable(e.to_string()),
            }),
        }
    }
}
