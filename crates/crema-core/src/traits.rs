//! Trait abstractions for scales and their discovery.
//!
//! The processor only ever talks to these traits, which lets it drive real
//! Bluetooth scales ([`crate::BleScale`], [`crate::BleDiscovery`]) and mock
//! ones ([`crate::MockScale`], [`crate::MockDiscovery`]) alike.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crema_types::{Connectivity, ScaleType, TareEvent, WeightSample};

use crate::bus::EventBus;
use crate::error::Result;
use crate::scan::DiscoveredScale;

/// One physical scale.
///
/// # Ordering contract
///
/// Implementations must publish on [`weight_updates`](Scale::weight_updates)
/// and [`tare_events`](Scale::tare_events) from a single task, awaiting each
/// `publish` before issuing the next, in the order notifications arrived from
/// the hardware. The processor relies on this to keep its history in arrival
/// order; it does not re-sort samples.
///
/// # Teardown
///
/// The event sources only hold handler closures, never the scale itself, so
/// dropping the last `Arc` releases the scale. [`decommission`](Scale::decommission)
/// still has to be called first so that background notification tasks stop
/// and the event sources are closed.
#[async_trait]
pub trait Scale: Send + Sync + std::fmt::Debug {
    /// Stable hardware identifier (MAC address or platform UUID).
    fn address(&self) -> &str;

    /// Advertised name, if known.
    fn name(&self) -> Option<&str>;

    /// Scale model.
    fn scale_type(&self) -> ScaleType;

    /// Current link status.
    fn connectivity(&self) -> Connectivity;

    /// Whether the link is up.
    fn is_connected(&self) -> bool {
        self.connectivity().is_connected()
    }

    /// Establish the link and start weight notifications.
    ///
    /// Connecting an already connected scale is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Tear the link down.
    ///
    /// Returns [`Error::NotConnected`](crate::Error::NotConnected) if there is
    /// no link; callers tearing down treat that as success.
    async fn disconnect(&self) -> Result<()>;

    /// Release hardware resources and close both event sources. Idempotent.
    async fn decommission(&self);

    /// Source of weight samples.
    fn weight_updates(&self) -> &EventBus<WeightSample>;

    /// Source of tare markers.
    fn tare_events(&self) -> &EventBus<TareEvent>;
}

/// Shared handle to a scale.
pub type SharedScale = Arc<dyn Scale>;

/// Whether two handles refer to the same scale object.
///
/// Compares object identity, not address: two objects built for the same
/// device are different scales.
pub fn same_scale(a: &SharedScale, b: &SharedScale) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Finds connectable scales.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Scan up to `timeout` for the first device whose advertised name starts
    /// with one of `prefixes`.
    async fn find_first_matching(
        &self,
        prefixes: &[&str],
        timeout: Duration,
    ) -> Result<Option<DiscoveredScale>>;

    /// Look `identifier` up among previously discovered devices, without scanning.
    async fn resolve_cached(&self, identifier: &str) -> Option<DiscoveredScale>;

    /// Actively scan up to `timeout` for `identifier`.
    ///
    /// Fails with [`Error::NoAddress`](crate::Error::NoAddress) if it does not show up.
    async fn scan_for_address(&self, identifier: &str, timeout: Duration)
    -> Result<DiscoveredScale>;
}

/// Builds scales from discovered devices.
#[async_trait]
pub trait ScaleFactory: Send + Sync {
    /// Create a (not yet connected) scale for `device`.
    ///
    /// Fails with [`Error::Instantiation`](crate::Error::Instantiation) if the
    /// device is not a supported scale.
    async fn create(&self, device: &DiscoveredScale) -> Result<SharedScale>;
}
