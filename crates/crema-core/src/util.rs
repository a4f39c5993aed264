//! Utility functions for crema-core.

use std::time::{SystemTime, UNIX_EPOCH};

use btleplug::platform::PeripheralId;

/// Wall-clock time in seconds since the UNIX epoch.
///
/// Used as the arrival time of samples. Returns 0.0 if the system clock is
/// set before 1970.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they are MAC
/// addresses. This strips the `PeripheralId(...)` debug wrapper.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id))
}

fn strip_debug_wrapper(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// On macOS, where addresses read as 00:00:00:00:00:00, uses the peripheral ID.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_null_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_null_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

/// Lowercase an identifier and drop `:`/`-` separators.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case- and separator-insensitive comparison of two scale identifiers.
///
/// `"aa:bb:cc:dd:ee:ff"`, `"AABBCCDDEEFF"` and `"AA-BB-CC-DD-EE-FF"` all match.
pub fn identifiers_match(a: &str, b: &str) -> bool {
    normalize_identifier(a) == normalize_identifier(b)
}
