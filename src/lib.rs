//! bus-tunnel: TCP tunnelling over a NATS message bus.
//!
//! An ingress process accepts SOCKS5 clients and an egress process dials
//! their destinations. Every open, every chunk of data and every close
//! travels between them as a request/reply exchange on subjects under a
//! shared prefix, so the two hosts only need to reach the bus.
//!
//! # Architecture
//!
//! - **Bus**: transport abstraction, NATS and in-process implementations,
//!   and the JSON request/reply bridge
//! - **SOCKS**: SOCKS5 CONNECT listener for the ingress
//! - **Tunnel**: connection registry, data plane and the two roles
//! - **Config**: hierarchical TOML configuration
//! - **Orchestrator**: process startup and graceful shutdown

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod bus;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod socks;
pub mod tunnel;
