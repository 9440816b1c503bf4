//! Command-line interface definitions for bus-tunnel.
//!
//! Uses clap's derive API for type-safe argument parsing. Flags left unset
//! fall through to the config files and then to built-in defaults.

use clap::Parser;
use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigError;

/// Tunnel TCP connections over a NATS message bus.
///
/// Run one process with `--input` next to the clients (it opens a SOCKS5
/// proxy) and one with `--output` next to the destinations (it dials them).
/// Both must use the same `--subject` prefix.
#[derive(Parser, Debug)]
#[command(name = "bus-tunnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run the ingress role: accept SOCKS5 clients and forward them over the bus.
    #[arg(short = 'i', long = "input")]
    pub input: bool,

    /// Run the egress role: dial destinations requested over the bus.
    #[arg(short = 'o', long = "output")]
    pub output: bool,

    /// Address the SOCKS5 proxy binds to [default: localhost].
    #[arg(long = "proxy-address", value_name = "ADDR")]
    pub proxy_address: Option<String>,

    /// Port the SOCKS5 proxy binds to [default: 1080].
    #[arg(long = "proxy-port", value_name = "PORT")]
    pub proxy_port: Option<u16>,

    /// Bus server(s), comma separated [default: localhost:4222].
    #[arg(short = 'u', long = "host", value_name = "SERVERS")]
    pub host: Option<String>,

    /// Bus authentication token.
    #[arg(short = 't', long = "token", value_name = "TOKEN")]
    pub token: Option<String>,

    /// Subject prefix shared by both ends of the tunnel.
    #[arg(short = 's', long = "subject", value_name = "PREFIX")]
    pub subject: Option<String>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Which end of the tunnel this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// SOCKS5 side.
    Ingress,
    /// Dialing side.
    Egress,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

impl Cli {
    /// The selected role.
    ///
    /// Exactly one of `--input` and `--output` must be set.
    pub fn role(&self) -> Result<Role, ConfigError> {
        match (self.input, self.output) {
            (true, false) => Ok(Role::Ingress),
            (false, true) => Ok(Role::Egress),
            _ => Err(ConfigError::AmbiguousRole),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_ingress() {
        let cli = Cli::parse_from(["bus-tunnel", "-i", "-s", "tunnels.office"]);
        assert_eq!(cli.role().unwrap(), Role::Ingress);
        assert_eq!(cli.subject.as_deref(), Some("tunnels.office"));
        assert!(cli.proxy_port.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "bus-tunnel",
            "--output",
            "-u",
            "nats://bus:4222",
            "-t",
            "secret",
            "--proxy-address",
            "0.0.0.0",
            "--proxy-port",
            "9050",
            "-c",
            "/tmp/tunnel.toml",
            "-vv",
        ]);

        assert_eq!(cli.role().unwrap(), Role::Egress);
        assert_eq!(cli.host.as_deref(), Some("nats://bus:4222"));
        assert_eq!(cli.token.as_deref(), Some("secret"));
        assert_eq!(cli.proxy_address.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.proxy_port, Some(9050));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tunnel.toml")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_role_requires_exactly_one_flag() {
        let neither = Cli::parse_from(["bus-tunnel", "-s", "t"]);
        assert!(matches!(neither.role(), Err(ConfigError::AmbiguousRole)));

        let both = Cli::parse_from(["bus-tunnel", "-i", "-o", "-s", "t"]);
        assert!(matches!(both.role(), Err(ConfigError::AmbiguousRole)));
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["bus-tunnel", "-i", "--proxy-port", "70000"]).is_err());
    }
}
