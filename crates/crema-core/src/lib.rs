//! Weight and flow estimation core for Bluetooth espresso scales.
//!
//! This crate turns the irregularly timed weight notifications of a BLE scale
//! into smoothed weight and mass-flow estimates, and owns the lifecycle of the
//! scale's connection: discovery, connect, hot-swap, teardown and
//! reconnection after link loss.
//!
//! # Features
//!
//! - **Scale processor**: bounded sample history, estimator pipeline and a
//!   derived [`WeightAndFlowUpdate`] per sample
//! - **Estimators**: current weight, least-squares flow, median weight and
//!   median of sub-window flows, or any custom [`Estimator`]
//! - **Lifecycle**: idempotent scale replacement by id, first-found binding,
//!   explicit decommissioning of replaced scales
//! - **Auto-reconnection**: backoff-driven reconnect monitor
//! - **Testing**: [`MockScale`] and [`MockDiscovery`] for hardware-free tests
//!
//! # Supported Scales
//!
//! | Scale | Name prefix |
//! |-------|-------------|
//! | Atomax Skale II | `Skale` |
//! | Decent Scale | `Decent Scale` |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use crema_core::{BleDiscovery, ProcessorConfig, ScaleProcessor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProcessorConfig::default();
//!     let discovery = Arc::new(BleDiscovery::new(config.bluetooth.scan_cache_expiry).await?);
//!     let processor = ScaleProcessor::from_discovery(discovery, config)?;
//!
//!     processor
//!         .event_weight_and_flow_update()
//!         .subscribe(|update| async move {
//!             println!("{:.1} g at {:.2} g/s", update.current_weight, update.average_flow);
//!         })
//!         .await?;
//!
//!     processor.first_if_found(true).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod estimator;
pub mod events;
pub mod history;
pub mod mock;
pub mod processor;
pub mod protocol;
pub mod reconnect;
pub mod scan;
pub mod traits;
pub mod util;

// Core exports
pub use bus::{EventBus, SubscriptionId};
pub use config::{BluetoothConfig, EstimatorConfig, ProcessorConfig};
pub use device::{BleScale, ConnectionConfig};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use estimator::{
    AverageFlow, CurrentWeight, EstimateError, EstimateResult, Estimates, Estimator,
    EstimatorPipeline, MedianFlow, MedianWeight, Slot,
};
pub use events::{EventDispatcher, EventReceiver, EventSender, ScaleEvent, ScaleId};
pub use history::{HistoryBuffer, HistorySnapshot};
pub use mock::{MockDiscovery, MockScale};
pub use processor::ScaleProcessor;
pub use protocol::{Notification, ScaleProtocol};
pub use reconnect::ReconnectOptions;
pub use scan::{BleDiscovery, DeviceCache, DiscoveredScale};
pub use traits::{Discovery, Scale, ScaleFactory, SharedScale, same_scale};

// Re-export from crema-types
pub use crema_types::uuid as uuids;
pub use crema_types::{
    Connectivity, Estimate, ScaleType, TareEvent, WeightAndFlowUpdate, WeightSample,
};
