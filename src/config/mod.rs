//! Configuration system for bus-tunnel.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/bus-tunnel/config.toml`
//! 3. User config: `~/.config/bus-tunnel/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! No file is required; the subject prefix may come from `--subject` alone.
//! Scalars set by a later source override earlier ones.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{BusConfig, Config, GeneralConfig, ProxyConfig, TunnelConfig};
