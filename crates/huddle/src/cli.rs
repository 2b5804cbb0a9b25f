//! `huddle` command line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Connect to 127.0.0.1:8888
//! huddle
//!
//! # Connect elsewhere
//! huddle --ip 10.0.0.5 --port 9000
//!
//! # Diagnostics go to stderr
//! RUST_LOG=huddle_client=debug huddle 2>client.log
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use huddle_protocol::{DEFAULT_HOST, DEFAULT_PORT};

use crate::client::{connect, pump_responses};
use crate::error::ClientError;
use crate::menu::Menu;

/// huddle chat client
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about)]
pub struct Args {
    /// Server host or IP address
    #[arg(long, visible_alias = "ip", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

/// Parses arguments and runs the client until the user exits or the
/// server hangs up.
pub fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("huddle_client=warn".parse()?),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(run_client(args));
    // A pending stdin read parks a blocking thread that never returns
    runtime.shutdown_background();
    result
}

async fn run_client(args: Args) -> Result<()> {
    let (sink, responses) = connect(&args.host, args.port)
        .await
        .context("Failed to connect")?;
    println!("client connected to {}:{}", args.host, args.port);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut menu = Menu::new(stdin, tokio::io::stdout(), sink);

    tokio::select! {
        result = menu.run() => {
            debug!("Menu finished");
            result?;
        }
        result = pump_responses(responses, tokio::io::stdout()) => {
            match result {
                Err(ClientError::Disconnected) => println!("server closed the connection"),
                other => other?,
            }
        }
    }

    Ok(())
}
