//! Transport abstraction over a subject-routed message bus.
//!
//! A transport provides three primitives: fire-and-forget `publish`,
//! pattern `subscribe`, and single-reply `request`. Everything the tunnel
//! does on the wire is built on top of these through [`BusBridge`].
//!
//! [`BusBridge`]: super::BusBridge

use bytes::Bytes;
use std::future::Future;
use tokio::sync::mpsc;

use super::error::BusResult;

/// Buffer size for per-subscription delivery channels.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The concrete subject the message was published on.
    pub subject: String,
    /// Message body.
    pub payload: Bytes,
    /// Reply subject, present when the publisher expects an answer.
    pub reply: Option<String>,
}

/// A subject-routed publish/subscribe transport with request/reply.
///
/// Subject patterns use `.` separated tokens; `*` matches exactly one token
/// and `>` matches one or more trailing tokens.
pub trait MessageBus: Clone + Send + Sync + 'static {
    /// Publish `payload` on `subject` without waiting for any answer.
    fn publish(
        &self,
        subject: String,
        payload: Bytes,
    ) -> impl Future<Output = BusResult<()>> + Send;

    /// Subscribe to every message matching `pattern`.
    ///
    /// The subscription ends when the returned receiver is dropped.
    fn subscribe(
        &self,
        pattern: String,
    ) -> impl Future<Output = BusResult<mpsc::Receiver<BusMessage>>> + Send;

    /// Publish `payload` on `subject` and wait for exactly one reply.
    ///
    /// Implementations must bound the wait; a missing reply surfaces as
    /// [`BusError::Timeout`](super::BusError::Timeout).
    fn request(
        &self,
        subject: String,
        payload: Bytes,
    ) -> impl Future<Output = BusResult<Bytes>> + Send;
}

/// Check whether a concrete `subject` matches a subscription `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
