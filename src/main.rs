//! bus-tunnel: tunnel TCP connections over a NATS message bus.
//!
//! Parses the CLI, loads configuration, sets up logging and hands over to
//! the orchestrator. All logging goes to stderr.

use anyhow::{Context, Result};
use bus_tunnel::{cli::Cli, config::ConfigLoader, orchestrator};
use clap::Parser;
use tracing::{debug, info};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();
    let role = cli.role()?;

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;
    debug!("Loaded configuration: {:?}", redacted(&config));

    info!(%role, "Starting bus-tunnel {}", env!("CARGO_PKG_VERSION"));
    orchestrator::run(role, config)
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then the configured `log_level`, then warnings only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let fallback = if configured.is_empty() { "warn" } else { configured };
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .context("Invalid log level")?,
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Copy of `config` safe to log.
fn redacted(config: &bus_tunnel::config::Config) -> bus_tunnel::config::Config {
    let mut config = config.clone();
    if !config.bus.token.is_empty() {
        config.bus.token = "<redacted>".to_string();
    }
    config
}
