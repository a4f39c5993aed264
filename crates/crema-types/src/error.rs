//! Error types for parsing in crema-types.

use thiserror::Error;

/// Errors that can occur when interpreting scale data or identifiers.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in crema-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The packet was shorter than the protocol requires.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// The packet failed its checksum.
    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum carried by the packet.
        actual: u8,
    },

    /// A scale type name was not recognized.
    #[error("Unknown scale type: {0}")]
    UnknownScaleType(String),

    /// A connectivity code was out of range.
    #[error("Unknown connectivity code: {0}")]
    UnknownConnectivity(u8),

    /// Generic invalid value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using crema-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
