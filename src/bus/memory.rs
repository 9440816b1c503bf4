//! In-process message bus.
//!
//! `MemoryBus` routes messages between subscribers living in the same
//! process. It honours the same subject wildcard rules and request/reply
//! semantics as the broker-backed transport, which makes it suitable for
//! tests and for embedding both tunnel roles in one process.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::error::{BusError, BusResult};
use super::transport::{BusMessage, MessageBus, SUBSCRIPTION_BUFFER, subject_matches};

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix for generated reply subjects.
const INBOX_PREFIX: &str = "_INBOX";

#[derive(Default)]
struct Routes {
    /// Active subscriptions as (pattern, sender).
    subscriptions: Vec<(String, mpsc::Sender<BusMessage>)>,
    /// Outstanding requests by reply subject.
    inboxes: HashMap<String, oneshot::Sender<Bytes>>,
}

/// Process-local bus implementing [`MessageBus`].
#[derive(Clone)]
pub struct MemoryBus {
    routes: Arc<Mutex<Routes>>,
    next_inbox: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl MemoryBus {
    /// Create a bus with the default request timeout.
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a bus whose requests give up after `request_timeout`.
    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self {
            routes: Arc::new(Mutex::new(Routes::default())),
            next_inbox: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    /// Number of live subscriptions (closed receivers are not counted).
    pub fn subscription_count(&self) -> usize {
        let routes = self.lock_routes();
        routes
            .subscriptions
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a message, returning how many subscribers it was routed to.
    async fn route(&self, subject: String, payload: Bytes, reply: Option<String>) -> usize {
        let targets: Vec<mpsc::Sender<BusMessage>> = {
            let mut routes = self.lock_routes();

            if let Some(waiter) = routes.inboxes.remove(&subject) {
                let _ = waiter.send(payload);
                return 1;
            }

            routes.subscriptions.retain(|(_, tx)| !tx.is_closed());
            routes
                .subscriptions
                .iter()
                .filter(|(pattern, _)| subject_matches(pattern, &subject))
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            let message = BusMessage {
                subject: subject.clone(),
                payload: payload.clone(),
                reply: reply.clone(),
            };
            if tx.send(message).await.is_ok() {
                delivered += 1;
            }
        }
        trace!(subject = %subject, delivered, "Routed message");
        delivered
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    async fn publish(&self, subject: String, payload: Bytes) -> BusResult<()> {
        self.route(subject, payload, None).await;
        Ok(())
    }

    async fn subscribe(&self, pattern: String) -> BusResult<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.lock_routes().subscriptions.push((pattern, tx));
        Ok(rx)
    }

    async fn request(&self, subject: String, payload: Bytes) -> BusResult<Bytes> {
        let inbox = format!(
            "{}.{}",
            INBOX_PREFIX,
            self.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, rx) = oneshot::channel();
        self.lock_routes().inboxes.insert(inbox.clone(), tx);

        if self.route(subject.clone(), payload, Some(inbox.clone())).await == 0 {
            self.lock_routes().inboxes.remove(&inbox);
            return Err(BusError::NoResponders(subject));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Unavailable(format!(
                "reply channel for '{subject}' closed"
            ))),
            Err(_) => {
                self.lock_routes().inboxes.remove(&inbox);
                Err(BusError::Timeout(subject))
            }
        }
    }
}
