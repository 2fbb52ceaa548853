//! CLI module for Switchboard
//!
//! Command-line interface definitions and handlers for the gateway and the
//! worker node.
//!
//! # Commands
//!
//! - `serve` - Start the gateway (HTTP surface + worker hub)
//! - `worker` - Run a worker node against a gateway
//!
//! # Example
//!
//! ```bash
//! # Start the gateway on $PORT (default 8080)
//! switchboard serve
//!
//! # Run a worker with its provider credentials
//! switchboard worker --config worker.yaml
//! ```

pub mod serve;
pub mod worker;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Switchboard - worker-fleet gateway for chat completions
#[derive(Parser, Debug)]
#[command(
    name = "switchboard",
    version,
    about = "Reverse-proxy gateway multiplexing chat completions over a worker fleet"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway
    Serve(ServeArgs),
    /// Run a worker node
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override the listen port
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SWITCHBOARD_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Path to the worker configuration file
    #[arg(short, long, default_value = "worker.yaml")]
    pub config: PathBuf,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SWITCHBOARD_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Initialize tracing with an env-filter; explicit CLI level wins over
/// `RUST_LOG`.
pub fn init_tracing(log_level: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
