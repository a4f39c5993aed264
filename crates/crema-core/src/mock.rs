//! Mock scale and discovery for testing.
//!
//! [`MockScale`] implements [`Scale`] without hardware; tests push weight
//! samples and tares into it and inspect how often it was connected,
//! disconnected and decommissioned. [`MockDiscovery`] implements both
//! [`Discovery`] and [`ScaleFactory`] over in-memory device lists.
//!
//! # Features
//!
//! - **Failure injection**: fail connects (always or the next N), disconnects,
//!   or instantiation of unrecognized devices
//! - **Latency simulation**: delay connects to exercise timeouts
//! - **Call counters**: verify idempotence and teardown

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crema_types::{Connectivity, ScaleType, TareEvent, WeightSample};

use crate::bus::EventBus;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::scan::{DeviceCache, DiscoveredScale};
use crate::traits::{Discovery, Scale, ScaleFactory, SharedScale};
use crate::util::{normalize_identifier, now_secs};

/// A mock scale for testing.
///
/// # Example
///
/// ```
/// use crema_core::{MockScale, Scale};
/// use crema_types::ScaleType;
///
/// #[tokio::main]
/// async fn main() {
///     let scale = MockScale::new("AA:BB:CC:DD:EE:FF", ScaleType::AtomaxSkaleII);
///     scale.connect().await.unwrap();
///     assert!(scale.is_connected());
///     assert_eq!(scale.connect_calls(), 1);
/// }
/// ```
pub struct MockScale {
    address: String,
    name: String,
    scale_type: ScaleType,
    connectivity: AtomicU8,
    weight_updates: EventBus<WeightSample>,
    tare_events: EventBus<TareEvent>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    decommission_calls: AtomicU32,
    decommissioned: AtomicBool,
    should_fail: AtomicBool,
    fail_disconnect: AtomicBool,
    /// Number of connects still to fail before succeeding.
    remaining_failures: AtomicU32,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScale")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("scale_type", &self.scale_type)
            .field("connectivity", &self.connectivity())
            .finish()
    }
}

impl MockScale {
    /// Create an unconnected mock named after its model.
    pub fn new(address: &str, scale_type: ScaleType) -> Self {
        Self::with_name(address, scale_type.name_prefix(), scale_type)
    }

    /// Create an unconnected mock with an explicit name.
    pub fn with_name(address: &str, name: &str, scale_type: ScaleType) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            scale_type,
            connectivity: AtomicU8::new(Connectivity::NotConnected as u8),
            weight_updates: EventBus::new(&format!("{name} weight-update")),
            tare_events: EventBus::new(&format!("{name} tare-seen")),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            decommission_calls: AtomicU32::new(0),
            decommissioned: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            connect_latency_ms: AtomicU64::new(0),
        }
    }

    fn set_connectivity(&self, state: Connectivity) {
        self.connectivity.store(state as u8, Ordering::SeqCst);
    }

    fn connect_failure(&self) -> Error {
        Error::connection_failed(
            Some(self.address.clone()),
            ConnectionFailureReason::Other("mock connect failure".to_string()),
        )
    }

    // --- Test control methods ---

    /// Publish a weight sample measured at `scale_time`. Returns the number of
    /// subscribers that ran.
    pub async fn push_weight(&self, scale_time: f64, weight: f64) -> usize {
        self.weight_updates
            .publish(WeightSample {
                scale_time,
                arrival_time: now_secs(),
                weight,
            })
            .await
    }

    /// Publish a tare reported at `scale_time`.
    pub async fn push_tare(&self, scale_time: f64) -> usize {
        self.tare_events
            .publish(TareEvent {
                scale_time,
                arrival_time: now_secs(),
            })
            .await
    }

    /// Drop the link as if the scale went out of range.
    pub fn simulate_link_loss(&self) {
        self.set_connectivity(Connectivity::NotConnected);
    }

    /// Make every connect fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` connects, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Make disconnect fail with a transport error.
    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    /// Delay each connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of `decommission` calls.
    pub fn decommission_calls(&self) -> u32 {
        self.decommission_calls.load(Ordering::SeqCst)
    }

    /// Whether `decommission` has run.
    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scale for MockScale {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::try_from(self.connectivity.load(Ordering::SeqCst))
            .unwrap_or(Connectivity::NotConnected)
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_decommissioned() {
            return Err(Error::Decommissioned);
        }
        if self.is_connected() {
            return Ok(());
        }

        self.set_connectivity(Connectivity::Connecting);
        let latency = self.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let transient = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient || self.should_fail.load(Ordering::SeqCst) {
            self.set_connectivity(Connectivity::NotConnected);
            return Err(self.connect_failure());
        }

        self.set_connectivity(Connectivity::Ready);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Error::disconnect_failed(&self.address, "mock disconnect failure"));
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.set_connectivity(Connectivity::NotConnected);
        Ok(())
    }

    async fn decommission(&self) {
        self.decommission_calls.fetch_add(1, Ordering::SeqCst);
        if self.decommissioned.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_connectivity(Connectivity::NotConnected);
        self.weight_updates.close().await;
        self.tare_events.close().await;
    }

    fn weight_updates(&self) -> &EventBus<WeightSample> {
        &self.weight_updates
    }

    fn tare_events(&self) -> &EventBus<TareEvent> {
        &self.tare_events
    }
}

/// In-memory discovery and scale factory.
///
/// Devices added with [`add_cached`](Self::add_cached) resolve without a
/// scan; devices added with [`add_in_range`](Self::add_in_range) are only
/// found by scanning (after which they are cached, like real discovery).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use crema_core::{Discovery, MockDiscovery};
/// use crema_core::scan::DiscoveredScale;
///
/// #[tokio::main]
/// async fn main() {
///     let discovery = MockDiscovery::new();
///     discovery
///         .add_in_range(DiscoveredScale::new("AA:BB", Some("Skale")))
///         .await;
///     assert!(discovery.resolve_cached("AA:BB").await.is_none());
///     let found = discovery
///         .scan_for_address("AA:BB", Duration::from_secs(1))
///         .await
///         .unwrap();
///     assert_eq!(found.identifier, "AA:BB");
///     assert!(discovery.resolve_cached("AA:BB").await.is_some());
/// }
/// ```
#[derive(Debug)]
pub struct MockDiscovery {
    cache: Mutex<DeviceCache>,
    in_range: Mutex<Vec<DiscoveredScale>>,
    prepared: Mutex<HashMap<String, Arc<MockScale>>>,
    created: Mutex<Vec<Arc<MockScale>>>,
    scan_count: AtomicU32,
}

impl Default for MockDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDiscovery {
    /// Empty discovery whose cache never expires during a test.
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(DeviceCache::new(Duration::from_secs(24 * 60 * 60))),
            in_range: Mutex::new(Vec::new()),
            prepared: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            scan_count: AtomicU32::new(0),
        }
    }

    /// Make `device` resolvable from the cache.
    pub async fn add_cached(&self, device: DiscoveredScale) {
        self.cache.lock().await.insert(device);
    }

    /// Make `device` findable by scanning.
    pub async fn add_in_range(&self, device: DiscoveredScale) {
        self.in_range.lock().await.push(device);
    }

    /// Hand out `scale` when a device with its address is instantiated.
    pub async fn prepare(&self, scale: Arc<MockScale>) {
        let key = normalize_identifier(scale.address());
        self.prepared.lock().await.insert(key, scale);
    }

    /// Every scale created so far, oldest first.
    pub async fn created(&self) -> Vec<Arc<MockScale>> {
        self.created.lock().await.clone()
    }

    /// The most recently created scale.
    pub async fn last_created(&self) -> Option<Arc<MockScale>> {
        self.created.lock().await.last().cloned()
    }

    /// Number of scans performed.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }

    async fn scan_for<P>(&self, predicate: P) -> Option<DiscoveredScale>
    where
        P: Fn(&DiscoveredScale) -> bool,
    {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        let found = self.in_range.lock().await.iter().find(|d| predicate(d)).cloned();
        if let Some(device) = &found {
            self.cache.lock().await.insert(device.clone());
        }
        found
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn find_first_matching(
        &self,
        prefixes: &[&str],
        _timeout: Duration,
    ) -> Result<Option<DiscoveredScale>> {
        Ok(self.scan_for(|d| d.name_matches(prefixes)).await)
    }

    async fn resolve_cached(&self, identifier: &str) -> Option<DiscoveredScale> {
        self.cache.lock().await.get(identifier)
    }

    async fn scan_for_address(
        &self,
        identifier: &str,
        _timeout: Duration,
    ) -> Result<DiscoveredScale> {
        self.scan_for(|d| d.matches(identifier))
            .await
            .ok_or_else(|| Error::device_not_found(identifier))
    }
}

#[async_trait]
impl ScaleFactory for MockDiscovery {
    async fn create(&self, device: &DiscoveredScale) -> Result<SharedScale> {
        let prepared = self
            .prepared
            .lock()
            .await
            .remove(&normalize_identifier(&device.identifier));

        let scale = match prepared {
            Some(scale) => scale,
            None => {
                let scale_type = device.scale_type.ok_or_else(|| {
                    Error::instantiation(
                        &device.identifier,
                        format!("unrecognized scale name {:?}", device.name),
                    )
                })?;
                let name = device.name.as_deref().unwrap_or(scale_type.name_prefix());
                Arc::new(MockScale::with_name(&device.identifier, name, scale_type))
            }
        };

        self.created.lock().await.push(Arc::clone(&scale));
        Ok(scale)
    }
}
