//! Message bus layer.
//!
//! This module wraps a subject-routed publish/subscribe transport into the
//! request/reply primitives the tunnel is built from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  BusBridge                   │
//! │   fire_rpc / fire_rpc_raw    respond_*       │
//! │        │  JSON reply envelope  ▲             │
//! └────────┼───────────────────────┼─────────────┘
//!          ▼                       │
//! ┌──────────────────────────────────────────────┐
//! │          MessageBus (transport)              │
//! │    publish    subscribe    request           │
//! │  ┌──────────┐           ┌───────────┐        │
//! │  │ NatsBus  │           │ MemoryBus │        │
//! │  └──────────┘           └───────────┘        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod nats;
pub mod transport;

pub use bridge::{BusBridge, RequestContext};
pub use envelope::ReplyEnvelope;
pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use nats::{NatsBus, NatsOptions};
pub use transport::{BusMessage, MessageBus, subject_matches};
