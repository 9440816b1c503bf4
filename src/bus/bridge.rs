//! Request/reply primitives layered over a [`MessageBus`].
//!
//! The bridge turns the bus into two operations:
//!
//! - **fire RPC**: publish a request, await the single correlated reply,
//!   decode its envelope and re-raise a remote failure locally.
//! - **respond**: subscribe to a subject pattern and answer every request
//!   with the handler's result or failure.
//!
//! Structured payloads are JSON; raw payloads bypass the codec.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::envelope::ReplyEnvelope;
use super::error::BusResult;
use super::transport::{BusMessage, MessageBus};

/// Context handed to a responder for each inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The concrete subject the request arrived on.
    ///
    /// Needed to recover values embedded in wildcard tokens.
    pub subject: String,
}

/// Request/reply bridge over a message bus transport.
#[derive(Debug, Clone)]
pub struct BusBridge<B> {
    bus: B,
}

impl<B: MessageBus> BusBridge<B> {
    /// Wrap a transport.
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// The underlying transport.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Send a JSON-encoded request and decode the reply's result.
    ///
    /// Returns `Ok(None)` when the responder succeeded without a value.
    ///
    /// # Errors
    ///
    /// - [`BusError::Remote`](super::BusError::Remote) if the responder failed
    /// - [`BusError::Timeout`](super::BusError::Timeout) if no reply arrived in time
    pub async fn fire_rpc<T, R>(&self, subject: &str, payload: &T) -> BusResult<Option<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = serde_json::to_vec(payload)?;
        self.exchange(subject, Bytes::from(data)).await
    }

    /// Send raw bytes as the request body and decode the reply's result.
    pub async fn fire_rpc_raw<R>(&self, subject: &str, payload: Bytes) -> BusResult<Option<R>>
    where
        R: DeserializeOwned,
    {
        self.exchange(subject, payload).await
    }

    async fn exchange<R>(&self, subject: &str, payload: Bytes) -> BusResult<Option<R>>
    where
        R: DeserializeOwned,
    {
        trace!(subject, bytes = payload.len(), "Sending request");
        let reply = self.bus.request(subject.to_string(), payload).await?;
        ReplyEnvelope::<R>::decode(&reply)
    }

    /// Answer JSON requests on `pattern`.
    ///
    /// A payload that fails to decode as `T` is answered with a failure
    /// envelope without invoking the handler.
    pub async fn respond_json<T, R, E, H, Fut>(
        &self,
        pattern: &str,
        handler: H,
    ) -> BusResult<JoinHandle<()>>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        H: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.respond_raw(pattern, move |payload: Bytes, context: RequestContext| {
            let invocation = serde_json::from_slice::<T>(&payload).map(|value| handler(value, context));
            async move {
                match invocation {
                    Ok(pending) => pending.await.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("invalid request payload: {e}")),
                }
            }
        })
        .await
    }

    /// Answer raw-payload requests on `pattern`.
    ///
    /// Each request runs in its own task, so a slow or failing handler never
    /// blocks or ends the subscription. Requests without a reply subject are
    /// handled and their outcome dropped.
    pub async fn respond_raw<R, E, H, Fut>(
        &self,
        pattern: &str,
        handler: H,
    ) -> BusResult<JoinHandle<()>>
    where
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        H: Fn(Bytes, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let mut messages = self.bus.subscribe(pattern.to_string()).await?;
        let handler = Arc::new(handler);
        let bus = self.bus.clone();
        let pattern = pattern.to_string();
        debug!(pattern = %pattern, "Responder subscribed");

        Ok(tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let handler = Arc::clone(&handler);
                let bus = bus.clone();
                tokio::spawn(async move {
                    let BusMessage {
                        subject,
                        payload,
                        reply,
                    } = message;
                    let context = RequestContext {
                        subject: subject.clone(),
                    };

                    let encoded = match handler(payload, context).await {
                        Ok(result) => ReplyEnvelope::success(result)
                            .encode()
                            .or_else(|e| ReplyEnvelope::failure(e.to_string()).encode()),
                        Err(e) => {
                            debug!(subject = %subject, error = %e, "Handler failed");
                            ReplyEnvelope::failure(e.to_string()).encode()
                        }
                    };

                    let Some(reply) = reply else {
                        return;
                    };
                    match encoded {
                        Ok(bytes) => {
                            if let Err(e) = bus.publish(reply, Bytes::from(bytes)).await {
                                warn!(subject = %subject, error = %e, "Failed to publish reply");
                            }
                        }
                        Err(e) => warn!(subject = %subject, error = %e, "Failed to encode reply"),
                    }
                });
            }
            debug!(pattern = %pattern, "Responder subscription ended");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, MemoryBus};
    use serde::Deserialize;
    use serde::de::IgnoredAny;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Add {
        a: u32,
        b: u32,
    }

    fn bridge() -> BusBridge<MemoryBus> {
        BusBridge::new(MemoryBus::with_request_timeout(Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let bridge = bridge();
        bridge
            .respond_json("math.add", |req: Add, _ctx| async move {
                Ok::<_, String>(req.a + req.b)
            })
            .await
            .unwrap();

        let sum: Option<u32> = bridge.fire_rpc("math.add", &Add { a: 2, b: 3 }).await.unwrap();
        assert_eq!(sum, Some(5));
    }

    #[tokio::test]
    async fn test_remote_failure_is_raised() {
        let bridge = bridge();
        bridge
            .respond_json("math.fail", |_req: Add, _ctx| async move {
                Err::<u32, _>("overflow")
            })
            .await
            .unwrap();

        let err = bridge
            .fire_rpc::<_, u32>("math.fail", &Add { a: 1, b: 1 })
            .await
            .unwrap_err();
        match err {
            BusError::Remote(message) => assert_eq!(message, "overflow"),
            other => unreachable!("Expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_payload_is_reported() {
        let bridge = bridge();
        bridge
            .respond_json("math.add", |req: Add, _ctx| async move {
                Ok::<_, String>(req.a + req.b)
            })
            .await
            .unwrap();

        let err = bridge
            .fire_rpc_raw::<u32>("math.add", Bytes::from_static(b"garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Remote(ref m) if m.contains("invalid request payload")));
    }

    #[tokio::test]
    async fn test_failure_does_not_end_subscription() {
        let bridge = bridge();
        bridge
            .respond_raw("echo.once", |payload: Bytes, _ctx| async move {
                if payload.is_empty() {
                    Err("empty payload".to_string())
                } else {
                    Ok(payload.len())
                }
            })
            .await
            .unwrap();

        assert!(bridge
            .fire_rpc_raw::<usize>("echo.once", Bytes::new())
            .await
            .is_err());
        let len: Option<usize> = bridge
            .fire_rpc_raw("echo.once", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(len, Some(3));
    }

    #[tokio::test]
    async fn test_context_carries_concrete_subject() {
        let bridge = bridge();
        bridge
            .respond_raw("items.*.get", |_payload: Bytes, ctx: RequestContext| async move {
                Ok::<_, String>(ctx.subject)
            })
            .await
            .unwrap();

        let subject: Option<String> = bridge
            .fire_rpc_raw("items.42.get", Bytes::new())
            .await
            .unwrap();
        assert_eq!(subject.as_deref(), Some("items.42.get"));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let bridge = bridge();
        bridge
            .respond_raw("slow.op", |_payload: Bytes, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap();

        let err = bridge
            .fire_rpc_raw::<IgnoredAny>("slow.op", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_no_responders() {
        let bridge = bridge();
        let err = bridge
            .fire_rpc_raw::<IgnoredAny>("nobody.home", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoResponders(_)));
    }
}
