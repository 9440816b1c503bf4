//! Reply envelope exchanged by request/reply calls.
//!
//! Every reply is a JSON object carrying either the handler's `result` or
//! the failure it raised under `exception`:
//!
//! ```json
//! {"result":{"socketId":7}}
//! {"exception":"connection refused"}
//! ```
//!
//! An absent or `null` result is a valid success with no value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{BusError, BusResult};

/// Wire form of a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope<T> {
    /// Value returned by the responder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Failure reported by the responder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl<T: Serialize> ReplyEnvelope<T> {
    /// Envelope for a successful handler invocation.
    pub fn success(result: T) -> Self {
        Self {
            result: Some(result),
            exception: None,
        }
    }

    /// Encode to JSON bytes.
    pub fn encode(&self) -> BusResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl ReplyEnvelope<()> {
    /// Envelope for a failed handler invocation.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: None,
            exception: Some(message.into()),
        }
    }
}

impl<T: DeserializeOwned> ReplyEnvelope<T> {
    /// Decode a reply, turning a reported exception into [`BusError::Remote`].
    pub fn decode(data: &[u8]) -> BusResult<Option<T>> {
        let envelope: ReplyEnvelope<T> = serde_json::from_slice(data)?;
        match envelope.exception {
            Some(message) => Err(BusError::Remote(message)),
            None => Ok(envelope.result),
        }
    }
}
