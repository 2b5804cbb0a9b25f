//! `huddled` command line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 127.0.0.1:8888
//! huddled
//!
//! # Listen on all interfaces, kick sessions after one minute of silence
//! huddled --host 0.0.0.0 --port 9000 --idle-timeout 60
//!
//! # Load a config file, override the port from the environment
//! HUDDLED_PORT=7000 huddled --config ./huddled.toml
//!
//! # Enable debug logging
//! RUST_LOG=huddled=debug huddled
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::server::ChatServer;

/// huddle chat server
#[derive(Parser, Debug)]
#[command(name = "huddled", version, about)]
pub struct Args {
    /// Host or IP address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to bind
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds of silence before a session is kicked
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Builds the effective configuration: flags over environment over
    /// file over defaults.
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout = Duration::from_secs(secs);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Parses arguments and runs the server until a shutdown signal.
pub fn run() -> Result<()> {
    let args = Args::parse();
    // Installed first so config loading is logged too
    init_tracing()?;
    let config = args.into_config()?;
    run_server(config)
}

/// Installs the global fmt subscriber, filtered by `RUST_LOG`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("huddled=info".parse()?)
                .add_directive("huddle_protocol=info".parse()?),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[tokio::main]
async fn run_server(config: ServerConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "huddled starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let server = ChatServer::bind(config, cancel_token)
        .await
        .context("Failed to start chat server")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("huddled stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"0.0.0.0\"\nport = 7000\nidle_timeout_secs = 30").unwrap();

        let args = Args::parse_from([
            "huddled",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "9000",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_tracing_is_installed_once() {
        assert!(init_tracing().is_ok());
        assert!(tracing::dispatcher::has_been_set());
        assert!(init_tracing().is_err());
    }

    #[test]
    fn test_zero_idle_timeout_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let args = Args::parse_from([
            "huddled",
            "--config",
            file.path().to_str().unwrap(),
            "--idle-timeout",
            "0",
        ]);
        assert!(args.into_config().is_err());
    }
}
