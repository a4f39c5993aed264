//! Example: Watching Weight and Flow
//!
//! This example binds a Bluetooth scale, prints every derived weight and
//! flow update, and keeps the scale connected until Ctrl-C.
//!
//! Run with: `cargo run --example watch_scale -- [SCALE_ADDRESS]`
//!
//! Without an address the first recognized scale in range is used.

use std::env;
use std::sync::Arc;

use crema_core::{BleDiscovery, ProcessorConfig, ScaleProcessor, WeightAndFlowUpdate};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = ProcessorConfig::default();
    let discovery = BleDiscovery::new(config.bluetooth.scan_cache_expiry)
        .await?
        .connection_config(config.bluetooth.connection_config());
    let processor = Arc::new(ScaleProcessor::from_discovery(Arc::new(discovery), config)?);

    processor
        .event_weight_and_flow_update()
        .subscribe(|update: WeightAndFlowUpdate| async move {
            println!(
                "{:10.3}  weight {:7.1} g  median {:7.1} g  \
                 flow {:6.2} g/s  median flow {:6.2} g/s",
                update.scale_time,
                update.current_weight,
                update.median_weight,
                update.average_flow,
                update.median_flow
            );
        })
        .await?;

    match env::args().nth(1) {
        Some(address) => {
            println!("Connecting to {}...", address);
            processor.change_scale_to_id(Some(&address)).await?;
        }
        None => {
            println!("Scanning for a scale...");
            if processor.first_if_found(true).await?.is_none() {
                eprintln!("No recognized scale found");
                std::process::exit(1);
            }
        }
    }

    println!(
        "Connected to {} ({})",
        processor.scale_name().as_deref().unwrap_or("Unknown"),
        processor.scale_address().as_deref().unwrap_or("?")
    );
    println!("Press Ctrl-C to stop");
    println!();

    let cancel = CancellationToken::new();
    let monitor = processor.start_reconnect_monitor(cancel.clone());

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    monitor.await?;
    processor.shutdown().await?;
    Ok(())
}
