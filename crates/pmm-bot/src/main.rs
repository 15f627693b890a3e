//! Prediction-market market maker - Entry Point
//!
//! Runs in observation mode: books and market discovery are live, order
//! placement and cancellation are logged instead of sent.

use anyhow::Result;
use clap::Parser;
use pmm_bot::config::DEFAULT_CONFIG_PATH;
use tracing::info;

/// Prediction-market YES/NO market maker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PMM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    pmm_telemetry::init_logging()?;

    info!("Starting pmm-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PMM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PMM_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = pmm_bot::AppConfig::from_file(&config_path)?;
    info!(
        mode = ?config.mode,
        static_markets = config.markets.len(),
        event_slugs = config.event_slugs.len(),
        "Configuration loaded"
    );

    let app = pmm_bot::Application::from_config(config)?.with_config_path(config_path);
    app.run().await?;

    Ok(())
}
