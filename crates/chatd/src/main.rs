//! chatd - the chat backend services under one binary.
//!
//! One subcommand per process: `api` (HTTP message API), `sink` (event-log
//! materialiser), `ws` (WebSocket fan-out). All three read the same
//! `CHAT_*` environment configuration and talk only through the event log
//! and the bucket store.

mod app;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chatd")]
#[command(about = "Multi-tenant chat backend services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP message API
    Api,
    /// Run the stream sink
    Sink,
    /// Run the WebSocket fan-out server
    Ws,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let service = match cli.command {
        Commands::Api => "api",
        Commands::Sink => "sink",
        Commands::Ws => "ws",
    };
    observability::init_with_config(observability::LogConfig {
        service_name: format!("chatd-{service}"),
        default_level: cli.log_level.clone(),
        json: cli.log_json,
    });

    let config = chat_config::ChatConfig::from_env();
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let result = match cli.command {
        Commands::Api => app::run_api(config, cancel).await,
        Commands::Sink => app::run_sink(config, cancel).await,
        Commands::Ws => app::run_ws(config, cancel).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "service stopped with error");
    }
    result
}

fn spawn_signal_handler(cancel: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
    Ok(())
}
