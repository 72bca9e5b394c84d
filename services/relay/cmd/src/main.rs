//! Stdio relay binary.
//!
//! Forwards stdin lines to a WebSocket endpoint and writes every message it
//! receives back to stdout, one per line. Stdout carries data only; logs go to
//! the log file and stderr.

use anyhow::Context;
use clap::Parser;
use relay_session::{spawn_signal_listener, validate_endpoint, Relay, WsConnector};
use relay_wire::InputFraming;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

mod config;
mod logging;

use config::{Overrides, RelayConfig};

/// Bidirectional stdin/stdout to WebSocket relay
#[derive(Parser, Debug)]
#[command(name = "stdio-relay", version, about = "Relay stdin/stdout lines over a WebSocket")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Endpoint host
    #[arg(long)]
    host: Option<String>,

    /// Endpoint port
    #[arg(long)]
    port: Option<u16>,

    /// Full endpoint URL, e.g. ws://127.0.0.1:8765 (overrides host and port)
    #[arg(long)]
    url: Option<String>,

    /// How stdin is split into messages: chunk or line
    #[arg(long)]
    framing: Option<InputFraming>,

    /// Delay between reconnect attempts, e.g. 5s
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Log file path
    #[arg(long, env = "RELAY_LOG_FILE", default_value = "stdio-relay.log")]
    log_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            url: self.url.clone(),
            framing: self.framing,
            reconnect_delay: self.reconnect_delay.map(Into::into),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level, &args.log_file) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    let status = match run(args).await {
        Ok(status) => status,
        Err(e) => {
            error!("Fatal startup error: {:#}", e);
            1
        }
    };

    info!("Process exiting with status {}", status);
    // Exit here rather than returning: the runtime would otherwise wait on the
    // blocking stdin read
    std::process::exit(status);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    info!("Starting stdio relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = RelayConfig::load_from_file(&args.config)?;
    config.apply_overrides(&args.overrides());

    let session_config = config.session_config();
    validate_endpoint(&session_config.endpoint)?;
    info!(
        "Relaying to {} (framing: {}, reconnect: {} x {}ms)",
        session_config.endpoint,
        session_config.framing,
        config.max_reconnect_attempts,
        config.reconnect_delay_ms
    );

    let (signal_tx, signal_rx) = mpsc::channel(4);
    spawn_signal_listener(signal_tx).context("Failed to install signal handlers")?;

    let status = Relay::new(session_config, WsConnector::new())
        .run(tokio::io::stdin(), tokio::io::stdout(), signal_rx)
        .await;
    Ok(status)
}
