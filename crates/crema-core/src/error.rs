//! Error types for crema-core.
//!
//! This module defines the errors that can occur while discovering,
//! connecting to and processing data from a Bluetooth scale.
//!
//! # Propagation
//!
//! | Error Type | Raised by | Caller strategy |
//! |------------|-----------|-----------------|
//! | [`Error::NoAddress`] | `change_scale_to_id` | Device not in range; retry later |
//! | [`Error::Instantiation`] | `change_scale_to_id` | Unsupported device; do not retry |
//! | [`Error::ConnectionFailed`] | `Scale::connect` | Transient; retry |
//! | [`Error::DisconnectFailed`] | `Scale::disconnect` | Transient; safe to ignore on teardown |
//! | [`Error::Timeout`] | disconnect/scan/service discovery | Transient; retry |
//! | [`Error::Subscription`] | event bus | Logged and tolerated during a swap |
//! | [`Error::InvalidConfig`] | config validation | Fix configuration and restart |
//!
//! Subscription failures during a scale swap never reach the caller: the
//! processor logs them and completes the swap. Estimator failures are
//! reported through [`crate::estimator::EstimateError`] and stay inside the
//! estimation pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when working with scales.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The requested device could not be resolved by any discovery mechanism.
    #[error("Device not found: {0}")]
    NoAddress(DeviceNotFoundReason),

    /// A resolved device could not be turned into a usable scale.
    #[error("Could not instantiate a scale from '{identifier}': {reason}")]
    Instantiation {
        /// Identifier of the resolved device.
        identifier: String,
        /// Why instantiation failed.
        reason: String,
    },

    /// Operation attempted while not connected to the scale.
    #[error("Not connected to scale")]
    NotConnected,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Disconnection failed.
    #[error("Disconnect failed for {device_id}: {reason}")]
    DisconnectFailed {
        /// The device identifier that failed to disconnect.
        device_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Subscribing to or unsubscribing from an event source failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The scale has been decommissioned and can no longer be used.
    #[error("Scale has been decommissioned")]
    Decommissioned,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Connection attempt timed out.
    Timeout,
    /// The scale does not expose the expected weight characteristic.
    MissingCharacteristic(String),
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "connection timed out"),
            Self::MissingCharacteristic(uuid) => {
                write!(f, "characteristic {} not found", uuid)
            }
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified id not found in cache or by scanning.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::NoAddress(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create an instantiation error.
    pub fn instantiation(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a disconnection failure.
    pub fn disconnect_failed(device_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DisconnectFailed {
            device_id: device_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the scale was already without a link.
    ///
    /// Teardown paths treat these as success.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::NotConnected | Error::Decommissioned)
    }
}

/// Result type alias using crema-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
