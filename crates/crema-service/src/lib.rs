//! Daemon that keeps a Bluetooth espresso scale bound.
//!
//! This crate provides a service that:
//! - Binds a configured scale, or the first recognized one in range
//! - Logs every derived weight and flow update and every lifecycle event
//! - Reconnects the scale after link loss
//! - Disconnects and releases the scale on shutdown
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/crema/crema.toml`:
//!
//! ```toml
//! [scale]
//! id = "AA:BB:CC:DD:EE:FF"   # omit to use the first scale found
//! first_if_found = true
//! auto_reconnect = true
//!
//! [bluetooth]
//! scan_time = 5
//! connect_timeout = 10
//! disconnect_timeout = 5
//! scan_cache_expiry = 300
//! reconnect_max_interval = 10
//!
//! [estimators]
//! history_capacity = 10
//! window = 10
//! median_flow_subwindow = 5
//!
//! [logging]
//! level = "info"
//! ```

pub mod config;
pub mod runner;

pub use config::{
    BluetoothSection, Config, ConfigError, EstimatorSection, LoggingConfig, ScaleConfig,
    ValidationError, default_config_path,
};
pub use runner::Runner;
