//! Processor configuration.
//!
//! These are plain in-memory settings. Loading them from a file is the job of
//! the embedding application (see the `crema-service` crate).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use crema_core::config::{BluetoothConfig, ProcessorConfig};
//!
//! let config = ProcessorConfig::default()
//!     .history_capacity(20)
//!     .bluetooth(BluetoothConfig::default().scan_time(Duration::from_secs(3)));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::device::ConnectionConfig;
use crate::error::{Error, Result};
use crate::estimator::{DEFAULT_SUBWINDOW, DEFAULT_WINDOW, EstimatorPipeline};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::reconnect::ReconnectOptions;

/// Window sizes for the standard estimator pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorConfig {
    /// Samples considered by every estimator.
    pub window: usize,
    /// Sub-window size for the median flow estimator.
    pub median_flow_subwindow: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            median_flow_subwindow: DEFAULT_SUBWINDOW,
        }
    }
}

impl EstimatorConfig {
    /// Set the estimation window.
    #[must_use]
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the median flow sub-window.
    #[must_use]
    pub fn median_flow_subwindow(mut self, subwindow: usize) -> Self {
        self.median_flow_subwindow = subwindow;
        self
    }

    /// Build the standard four-estimator pipeline.
    pub fn build_pipeline(&self) -> Result<EstimatorPipeline> {
        EstimatorPipeline::standard(self.window, self.median_flow_subwindow)
    }

    fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(Error::invalid_config("estimator window must be >= 2"));
        }
        if self.median_flow_subwindow < 2 {
            return Err(Error::invalid_config(
                "median_flow_subwindow must be >= 2",
            ));
        }
        if self.median_flow_subwindow > self.window {
            return Err(Error::invalid_config(format!(
                "median_flow_subwindow ({}) must not exceed window ({})",
                self.median_flow_subwindow, self.window
            )));
        }
        Ok(())
    }
}

/// Bluetooth timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothConfig {
    /// Duration of a discovery scan.
    pub scan_time: Duration,
    /// Bound on connecting, and on the fallback scan when an id is not cached.
    pub connect_timeout: Duration,
    /// Bound on disconnecting the outgoing scale during a change.
    pub disconnect_timeout: Duration,
    /// How long a discovered device stays resolvable without rescanning.
    pub scan_cache_expiry: Duration,
    /// Upper bound on the delay between reconnection attempts.
    pub reconnect_max_interval: Duration,
    /// Give up reconnecting after this many attempts (`None` retries forever).
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            scan_time: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
            scan_cache_expiry: Duration::from_secs(300),
            reconnect_max_interval: Duration::from_secs(10),
            reconnect_max_attempts: None,
        }
    }
}

impl BluetoothConfig {
    /// Set the scan duration.
    #[must_use]
    pub fn scan_time(mut self, duration: Duration) -> Self {
        self.scan_time = duration;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = duration;
        self
    }

    /// Set the disconnect timeout.
    #[must_use]
    pub fn disconnect_timeout(mut self, duration: Duration) -> Self {
        self.disconnect_timeout = duration;
        self
    }

    /// Set the discovery cache expiry.
    #[must_use]
    pub fn scan_cache_expiry(mut self, duration: Duration) -> Self {
        self.scan_cache_expiry = duration;
        self
    }

    /// Set the reconnect backoff ceiling.
    #[must_use]
    pub fn reconnect_max_interval(mut self, duration: Duration) -> Self {
        self.reconnect_max_interval = duration;
        self
    }

    /// Limit reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = Some(attempts);
        self
    }

    /// Connection settings for scales created under this configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default().connection_timeout(self.connect_timeout)
    }

    fn validate(&self) -> Result<()> {
        let durations = [
            ("scan_time", self.scan_time),
            ("connect_timeout", self.connect_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
            ("reconnect_max_interval", self.reconnect_max_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Configuration for [`ScaleProcessor`](crate::ScaleProcessor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Minimum number of samples retained. Grows to the largest estimator window.
    pub history_capacity: usize,
    /// Standard pipeline windows.
    pub estimators: EstimatorConfig,
    /// Bluetooth timing.
    pub bluetooth: BluetoothConfig,
    /// Whether the reconnect monitor should act on link loss.
    pub auto_reconnect: bool,
    /// How often the reconnect monitor checks the link.
    pub health_check_interval: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            estimators: EstimatorConfig::default(),
            bluetooth: BluetoothConfig::default(),
            auto_reconnect: true,
            health_check_interval: Duration::from_secs(2),
            event_capacity: 100,
        }
    }
}

impl ProcessorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the history capacity.
    #[must_use]
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the estimator windows.
    #[must_use]
    pub fn estimators(mut self, estimators: EstimatorConfig) -> Self {
        self.estimators = estimators;
        self
    }

    /// Set the Bluetooth timing.
    #[must_use]
    pub fn bluetooth(mut self, bluetooth: BluetoothConfig) -> Self {
        self.bluetooth = bluetooth;
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the link health check interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the lifecycle event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Backoff used by the reconnect monitor.
    pub fn reconnect_options(&self) -> ReconnectOptions {
        let max = self.bluetooth.reconnect_max_interval;
        let options = ReconnectOptions::default()
            .initial_delay(Duration::from_secs(1).min(max))
            .max_delay(max);
        match self.bluetooth.reconnect_max_attempts {
            Some(attempts) => options.max_attempts(attempts),
            None => options,
        }
    }

    /// Check the configuration for values the processor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(Error::invalid_config("history_capacity must be > 0"));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::invalid_config("health_check_interval must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        self.estimators.validate()?;
        self.bluetooth.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.estimators.window, 10);
        assert_eq!(config.estimators.median_flow_subwindow, 5);
        assert_eq!(config.bluetooth.scan_time, Duration::from_secs(5));
        assert_eq!(config.bluetooth.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.bluetooth.scan_cache_expiry, Duration::from_secs(300));
        assert_eq!(
            config.bluetooth.reconnect_max_interval,
            Duration::from_secs(10)
        );
        assert!(config.auto_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ProcessorConfig::new()
            .history_capacity(32)
            .auto_reconnect(false)
            .estimators(EstimatorConfig::default().window(20).median_flow_subwindow(4));
        assert_eq!(config.history_capacity, 32);
        assert!(!config.auto_reconnect);
        assert_eq!(config.estimators.window, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_subwindow_above_window() {
        let config = ProcessorConfig::default()
            .estimators(EstimatorConfig::default().window(4).median_flow_subwindow(5));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("median_flow_subwindow"));
    }

    #[test]
    fn test_validate_rejects_small_subwindow() {
        let config = ProcessorConfig::default()
            .estimators(EstimatorConfig::default().median_flow_subwindow(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = ProcessorConfig::default()
            .bluetooth(BluetoothConfig::default().connect_timeout(Duration::ZERO));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect_timeout"));

        let config = ProcessorConfig::default().health_check_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        assert!(ProcessorConfig::default().history_capacity(0).validate().is_err());
        assert!(ProcessorConfig::default().event_capacity(0).validate().is_err());
    }

    #[test]
    fn test_reconnect_options_follow_bluetooth_config() {
        let config = ProcessorConfig::default().bluetooth(
            BluetoothConfig::default()
                .reconnect_max_interval(Duration::from_secs(4))
                .reconnect_max_attempts(3),
        );
        let options = config.reconnect_options();
        assert_eq!(options.max_attempts, Some(3));
        assert_eq!(options.delay_for_attempt(10), Duration::from_secs(4));

        let unlimited = ProcessorConfig::default().reconnect_options();
        assert_eq!(unlimited.max_attempts, None);
    }

    #[test]
    fn test_connect_timeout_bounds_ble_connect() {
        let bluetooth = BluetoothConfig::default().connect_timeout(Duration::from_secs(30));
        let connection = bluetooth.connection_config();
        assert_eq!(connection.connection_timeout, Duration::from_secs(30));
        assert_eq!(
            connection.discovery_timeout,
            ConnectionConfig::default().discovery_timeout
        );
    }

    #[test]
    fn test_build_pipeline() {
        let pipeline = EstimatorConfig::default().build_pipeline().unwrap();
        assert_eq!(pipeline.len(), 4);
        assert_eq!(pipeline.required_history(), 10);
    }
}
