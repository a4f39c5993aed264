//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crema_core::{BluetoothConfig, ConnectionConfig, EstimatorConfig, ProcessorConfig};

/// Log levels accepted by `[logging] level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which scale to bind and how to keep it.
    pub scale: ScaleConfig,
    /// Bluetooth timing.
    pub bluetooth: BluetoothSection,
    /// Estimator windows.
    pub estimators: EstimatorSection,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if there is no file.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load_validated(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use crema_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.scale.validate());
        errors.extend(self.bluetooth.validate());
        errors.extend(self.estimators.validate());
        errors.extend(self.logging.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Processor settings described by this file.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::new()
            .history_capacity(self.estimators.history_capacity)
            .estimators(
                EstimatorConfig::default()
                    .window(self.estimators.window)
                    .median_flow_subwindow(self.estimators.median_flow_subwindow),
            )
            .bluetooth(self.bluetooth.to_core())
            .auto_reconnect(self.scale.auto_reconnect)
            .health_check_interval(Duration::from_secs(self.scale.health_check_interval))
    }

    /// Connection settings handed to every BLE scale.
    pub fn connection_config(&self) -> ConnectionConfig {
        self.bluetooth.to_core().connection_config()
    }
}

/// Scale selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Address of the scale to bind at startup.
    pub id: Option<String>,
    /// Without an `id`, bind the first recognized scale found.
    pub first_if_found: bool,
    /// Reconnect after link loss.
    pub auto_reconnect: bool,
    /// Link check period in seconds.
    pub health_check_interval: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            id: None,
            first_if_found: true,
            auto_reconnect: true,
            health_check_interval: 2,
        }
    }
}

impl ScaleConfig {
    /// Validate scale configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "scale.id".to_string(),
                message: "scale id cannot be empty (omit it instead)".to_string(),
            });
        }
        if self.health_check_interval == 0 {
            errors.push(ValidationError {
                field: "scale.health_check_interval".to_string(),
                message: "health check interval must be at least 1 second".to_string(),
            });
        }
        errors
    }
}

/// Bluetooth timing, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothSection {
    /// Duration of a first-found scan.
    pub scan_time: u64,
    /// Limit for a scan by address, and for connecting.
    pub connect_timeout: u64,
    /// Limit for disconnecting a replaced scale.
    pub disconnect_timeout: u64,
    /// How long a discovered device stays resolvable without rescanning.
    pub scan_cache_expiry: u64,
    /// Longest wait between reconnect attempts.
    pub reconnect_max_interval: u64,
    /// Stop reconnecting after this many failed attempts.
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for BluetoothSection {
    fn default() -> Self {
        let core = BluetoothConfig::default();
        Self {
            scan_time: core.scan_time.as_secs(),
            connect_timeout: core.connect_timeout.as_secs(),
            disconnect_timeout: core.disconnect_timeout.as_secs(),
            scan_cache_expiry: core.scan_cache_expiry.as_secs(),
            reconnect_max_interval: core.reconnect_max_interval.as_secs(),
            reconnect_max_attempts: core.reconnect_max_attempts,
        }
    }
}

impl BluetoothSection {
    /// Validate Bluetooth configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let durations = [
            ("scan_time", self.scan_time),
            ("connect_timeout", self.connect_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
            ("scan_cache_expiry", self.scan_cache_expiry),
            ("reconnect_max_interval", self.reconnect_max_interval),
        ];
        for (name, secs) in durations {
            if secs == 0 {
                errors.push(ValidationError {
                    field: format!("bluetooth.{}", name),
                    message: "must be at least 1 second".to_string(),
                });
            }
        }
        if self.reconnect_max_attempts == Some(0) {
            errors.push(ValidationError {
                field: "bluetooth.reconnect_max_attempts".to_string(),
                message: "must be at least 1 (omit for unlimited)".to_string(),
            });
        }
        errors
    }

    fn to_core(&self) -> BluetoothConfig {
        let config = BluetoothConfig::default()
            .scan_time(Duration::from_secs(self.scan_time))
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .disconnect_timeout(Duration::from_secs(self.disconnect_timeout))
            .scan_cache_expiry(Duration::from_secs(self.scan_cache_expiry))
            .reconnect_max_interval(Duration::from_secs(self.reconnect_max_interval));
        match self.reconnect_max_attempts {
            Some(attempts) => config.reconnect_max_attempts(attempts),
            None => config,
        }
    }
}

/// Estimator windows, in samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSection {
    /// Minimum number of samples kept.
    pub history_capacity: usize,
    /// Samples used by each estimator.
    pub window: usize,
    /// Samples per sub-window of the median flow.
    pub median_flow_subwindow: usize,
}

impl Default for EstimatorSection {
    fn default() -> Self {
        let core = ProcessorConfig::default();
        Self {
            history_capacity: core.history_capacity,
            window: core.estimators.window,
            median_flow_subwindow: core.estimators.median_flow_subwindow,
        }
    }
}

impl EstimatorSection {
    /// Validate estimator configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.history_capacity == 0 {
            errors.push(ValidationError {
                field: "estimators.history_capacity".to_string(),
                message: "history capacity cannot be 0".to_string(),
            });
        }
        if self.window < 2 {
            errors.push(ValidationError {
                field: "estimators.window".to_string(),
                message: format!("window {} is too small (minimum 2)", self.window),
            });
        }
        if self.median_flow_subwindow < 2 || self.median_flow_subwindow > self.window {
            errors.push(ValidationError {
                field: "estimators.median_flow_subwindow".to_string(),
                message: format!(
                    "sub-window {} must be between 2 and the window ({})",
                    self.median_flow_subwindow, self.window
                ),
            });
        }
        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the crema crates; `RUST_LOG` still applies on top.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Vec::new()
        } else {
            vec![ValidationError {
                field: "logging.level".to_string(),
                message: format!(
                    "unknown level '{}': expected one of {}",
                    self.level,
                    LOG_LEVELS.join(", ")
                ),
            }]
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `bluetooth.scan_time`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crema")
        .join("crema.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.scale.id, None);
        assert!(config.scale.first_if_found);
        assert!(config.scale.auto_reconnect);
        assert_eq!(config.bluetooth.scan_time, 5);
        assert_eq!(config.bluetooth.scan_cache_expiry, 300);
        assert_eq!(config.estimators.window, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_match_processor_defaults() {
        assert_eq!(Config::default().processor_config(), ProcessorConfig::default());
    }

    #[test]
    fn test_connect_timeout_reaches_ble_connection() {
        let config: Config = toml::from_str("[bluetooth]\nconnect_timeout = 30\n").unwrap();
        assert_eq!(
            config.connection_config().connection_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            config.processor_config().bluetooth.connection_config(),
            config.connection_config()
        );
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [scale]
            id = "AA:BB:CC:DD:EE:FF"
            first_if_found = false
            auto_reconnect = false

            [bluetooth]
            scan_time = 3
            connect_timeout = 15
            reconnect_max_attempts = 4

            [estimators]
            window = 20
            median_flow_subwindow = 8

            [logging]
            level = "debug"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.scale.id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert!(!config.scale.first_if_found);
        assert_eq!(config.bluetooth.scan_time, 3);
        // Unset fields keep their defaults.
        assert_eq!(config.bluetooth.disconnect_timeout, 5);
        assert_eq!(config.estimators.history_capacity, 10);
        assert!(config.validate().is_ok());

        let processor = config.processor_config();
        assert!(!processor.auto_reconnect);
        assert_eq!(processor.bluetooth.scan_time, Duration::from_secs(3));
        assert_eq!(processor.bluetooth.connect_timeout, Duration::from_secs(15));
        assert_eq!(processor.bluetooth.reconnect_max_attempts, Some(4));
        assert_eq!(processor.estimators.window, 20);
        assert_eq!(processor.estimators.median_flow_subwindow, 8);
        assert!(processor.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("crema.toml");

        let mut config = Config::default();
        config.scale.id = Some("AA:BB:CC:DD:EE:FF".to_string());
        config.bluetooth.reconnect_max_attempts = Some(3);
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/crema.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_invalid_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("crema.toml");
        std::fs::write(&config_path, "[estimators]\nwindow = 1\n").unwrap();

        let result = Config::load_validated(&config_path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.scale.id = Some("  ".to_string());
        config.bluetooth.connect_timeout = 0;
        config.bluetooth.reconnect_max_attempts = Some(0);
        config.estimators.median_flow_subwindow = 11;
        config.logging.level = "loud".to_string();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "scale.id",
                "bluetooth.connect_timeout",
                "bluetooth.reconnect_max_attempts",
                "estimators.median_flow_subwindow",
                "logging.level",
            ]
        );
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let logging = LoggingConfig {
            level: "DEBUG".to_string(),
        };
        assert!(logging.validate().is_empty());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("crema/crema.toml"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Validation(vec![ValidationError {
            field: "bluetooth.scan_time".to_string(),
            message: "must be at least 1 second".to_string(),
        }]);
        let display = format!("{}", error);
        assert!(display.contains("validation failed"));
        assert!(display.contains("  - bluetooth.scan_time: must be at least 1 second"));
    }
}
