//! Configuration schema definitions.
//!
//! Every field uses its zero value (empty string, `0`) to mean "not set",
//! so a partial file only overrides what it names.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [bus]
//! servers = "nats://bus.internal:4222"
//! token = "s3cret"
//! request_timeout_ms = 10000
//! name = "tunnel-ingress"
//!
//! [proxy]
//! address = "127.0.0.1"
//! port = 1080
//! handshake_timeout_ms = 10000
//!
//! [tunnel]
//! subject = "tunnels.office"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;
use crate::bus::NatsOptions;
use crate::socks::ListenerConfig;
use crate::tunnel::Subjects;

/// Default bus server list.
pub const DEFAULT_SERVERS: &str = "localhost:4222";

/// Default bus request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default proxy bind address.
pub const DEFAULT_PROXY_ADDRESS: &str = "localhost";

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 1080;

/// Default SOCKS5 handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Message bus connection.
    #[serde(default)]
    pub bus: BusConfig,

    /// SOCKS5 listener (ingress only).
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Tunnel settings shared by both roles.
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Config {
    /// Built-in defaults, the bottom of the merge hierarchy.
    pub fn builtin() -> Self {
        Self {
            general: GeneralConfig::default(),
            bus: BusConfig {
                servers: DEFAULT_SERVERS.to_string(),
                request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
                ..Default::default()
            },
            proxy: ProxyConfig {
                address: DEFAULT_PROXY_ADDRESS.to_string(),
                port: DEFAULT_PROXY_PORT,
                handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            },
            tunnel: TunnelConfig::default(),
        }
    }

    /// Merge another config into this one. Set scalars in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.bus.merge(other.bus);
        self.proxy.merge(other.proxy);
        self.tunnel.merge(other.tunnel);
    }

    /// Check the merged result before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_subject(&self.tunnel.subject)?;

        if self.bus.servers.trim().is_empty() {
            return Err(ConfigError::invalid("bus.servers", "must not be empty"));
        }
        if self.bus.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "bus.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.proxy.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "proxy.handshake_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Options for connecting to the bus.
    pub fn nats_options(&self) -> NatsOptions {
        NatsOptions {
            servers: self.bus.servers.clone(),
            token: non_empty(&self.bus.token),
            request_timeout: Duration::from_millis(self.bus.request_timeout_ms),
            name: non_empty(&self.bus.name),
        }
    }

    /// Settings for the SOCKS5 listener.
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            address: self.proxy.address.clone(),
            port: self.proxy.port,
            handshake_timeout: Duration::from_millis(self.proxy.handshake_timeout_ms),
        }
    }

    /// The tunnel's subject namespace.
    pub fn subjects(&self) -> Subjects {
        Subjects::new(self.tunnel.subject.clone())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// A subject prefix must be a concrete, well-formed subject.
fn validate_subject(subject: &str) -> Result<(), ConfigError> {
    const FIELD: &str = "tunnel.subject";

    if subject.is_empty() {
        return Err(ConfigError::invalid(
            FIELD,
            "a subject prefix is required (--subject or [tunnel] subject)",
        ));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(FIELD, "must not contain whitespace"));
    }
    if subject.contains(['*', '>']) {
        return Err(ConfigError::invalid(FIELD, "must not contain wildcards"));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(ConfigError::invalid(FIELD, "must not contain empty tokens"));
    }
    Ok(())
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Message bus connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BusConfig {
    /// Comma-separated server list.
    #[serde(default)]
    pub servers: String,

    /// Authentication token.
    #[serde(default)]
    pub token: String,

    /// Timeout for every bus request in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: u64,

    /// Client name reported to the server.
    #[serde(default)]
    pub name: String,
}

impl BusConfig {
    fn merge(&mut self, other: BusConfig) {
        if !other.servers.is_empty() {
            self.servers = other.servers;
        }
        if !other.token.is_empty() {
            self.token = other.token;
        }
        if other.request_timeout_ms != 0 {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if !other.name.is_empty() {
            self.name = other.name;
        }
    }
}

/// SOCKS5 listener settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Bind address.
    #[serde(default)]
    pub address: String,

    /// Bind port.
    #[serde(default)]
    pub port: u16,

    /// Handshake deadline in milliseconds.
    #[serde(default)]
    pub handshake_timeout_ms: u64,
}

impl ProxyConfig {
    fn merge(&mut self, other: ProxyConfig) {
        if !other.address.is_empty() {
            self.address = other.address;
        }
        if other.port != 0 {
            self.port = other.port;
        }
        if other.handshake_timeout_ms != 0 {
            self.handshake_timeout_ms = other.handshake_timeout_ms;
        }
    }
}

/// Tunnel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Subject prefix shared by both ends.
    #[serde(default)]
    pub subject: String,
}

impl TunnelConfig {
    fn merge(&mut self, other: TunnelConfig) {
        if !other.subject.is_empty() {
            self.subject = other.subject;
        }
    }
}
