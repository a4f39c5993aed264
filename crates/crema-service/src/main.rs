//! Crema Service - keeps a scale bound and logs weight and flow.
//!
//! Run with: `cargo run -p crema-service -- --scale AA:BB:CC:DD:EE:FF`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crema_core::{BleDiscovery, ScaleProcessor};
use crema_service::{Config, Runner};

/// Crema Service - keeps a Bluetooth espresso scale bound.
#[derive(Parser, Debug)]
#[command(name = "crema-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scale address to bind (overrides config).
    #[arg(short, long)]
    scale: Option<String>,

    /// Bind the first recognized scale found (overrides config).
    #[arg(long)]
    first_if_found: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(scale) = args.scale {
        config.scale.id = Some(scale);
    }
    if args.first_if_found {
        config.scale.first_if_found = true;
    }
    config.validate()?;

    // Initialize logging
    let level = config.logging.level.to_ascii_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("crema_service={}", level).parse()?)
                .add_directive(format!("crema_core={}", level).parse()?),
        )
        .init();

    let processor_config = config.processor_config();
    info!("Opening Bluetooth adapter");
    let discovery = BleDiscovery::new(processor_config.bluetooth.scan_cache_expiry)
        .await?
        .connection_config(config.connection_config());
    let processor = ScaleProcessor::from_discovery(Arc::new(discovery), processor_config)?;

    let runner = Runner::new(Arc::new(processor), config.scale.clone());
    runner
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    Ok(())
}
