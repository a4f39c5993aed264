//! Bluetooth UUIDs for supported scales.

use uuid::{Uuid, uuid};

// --- Atomax Skale II ---

/// Skale II primary service.
pub const SKALE_SERVICE: Uuid = uuid!("0000ff08-0000-1000-8000-00805f9b34fb");

/// Skale II weight notification characteristic.
pub const SKALE_WEIGHT: Uuid = uuid!("0000ef81-0000-1000-8000-00805f9b34fb");

/// Skale II command characteristic.
pub const SKALE_COMMAND: Uuid = uuid!("0000ef80-0000-1000-8000-00805f9b34fb");

// --- Decent Scale ---

/// Decent Scale primary service.
pub const DECENT_SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

/// Decent Scale notification characteristic (weight, tare, buttons).
pub const DECENT_READ: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

/// Decent Scale command characteristic.
pub const DECENT_WRITE: Uuid = uuid!("000036f5-0000-1000-8000-00805f9b34fb");
