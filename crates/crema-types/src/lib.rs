//! Platform-agnostic types for Bluetooth espresso scales.
//!
//! This crate provides the data types shared between the scale processor
//! (crema-core) and anything consuming its output, such as a brewing
//! control loop or an API layer.
//!
//! # Features
//!
//! - Weight samples and tare markers as delivered by a scale
//! - Smoothed estimates and the derived weight-and-flow event
//! - Scale models, their advertised-name prefixes and BLE UUIDs
//! - Connectivity states
//!
//! # Example
//!
//! ```
//! use crema_types::{ScaleType, WeightSample};
//!
//! let sample = WeightSample::new(0.5, 10.0);
//! assert_eq!(sample.weight, 10.0);
//! assert_eq!(ScaleType::from_name("Skale 0A"), Some(ScaleType::AtomaxSkaleII));
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{Connectivity, Estimate, ScaleType, TareEvent, WeightAndFlowUpdate, WeightSample};
