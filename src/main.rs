//! gamebridge binary
//!
//! Loads configuration, composes the settlement engine with in-process
//! collaborators, and serves the webhook gateway.

use clap::Parser;
use gamebridge::{api::server::ApiServer, compose, config::GatewayConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gamebridge", about = "Game aggregation settlement gateway")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamebridge=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("🚀 Starting gamebridge");
    info!("   Registered aggregators: {}", config.aggregators.len());
    for entry in &config.aggregators {
        info!("   - {} ({}) active={}", entry.identity, entry.kind, entry.active);
    }

    let services = compose(&config, None, None, None, None);
    let server = ApiServer::new(
        config.server,
        services.engine,
        services.registry,
        services.aggregators,
    );
    server.run().await
}
