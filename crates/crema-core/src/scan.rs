//! Scale discovery.
//!
//! [`BleDiscovery`] scans with btleplug and remembers every device it sees in
//! a [`DeviceCache`], so that a later [`Discovery::resolve_cached`] can answer
//! without scanning again. Entries expire after the configured cache expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::RwLock;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crema_types::ScaleType;

use crate::device::{BleScale, ConnectionConfig};
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::{Discovery, ScaleFactory, SharedScale};
use crate::util::{create_identifier, format_peripheral_id, identifiers_match, normalize_identifier};

/// How often the adapter's peripheral list is polled while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredScale {
    /// Connection identifier (peripheral ID on macOS, address elsewhere).
    pub identifier: String,
    /// The BLE address as a string (zeros on macOS).
    pub address: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Scale model, if the name is recognized.
    pub scale_type: Option<ScaleType>,
    /// Signal strength.
    pub rssi: Option<i16>,
}

impl DiscoveredScale {
    /// Describe a device by identifier and advertised name.
    pub fn new(identifier: impl Into<String>, name: Option<&str>) -> Self {
        let identifier = identifier.into();
        Self {
            address: identifier.clone(),
            identifier,
            name: name.map(str::to_string),
            scale_type: name.and_then(ScaleType::from_name),
            rssi: None,
        }
    }

    /// Whether `identifier` refers to this device.
    pub fn matches(&self, identifier: &str) -> bool {
        identifiers_match(&self.identifier, identifier)
            || identifiers_match(&self.address, identifier)
    }

    /// Whether the advertised name starts with any of `prefixes`.
    pub fn name_matches(&self, prefixes: &[&str]) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| prefixes.iter().any(|p| name.starts_with(p)))
    }
}

/// Previously discovered devices, keyed by normalized identifier.
#[derive(Debug, Clone)]
pub struct DeviceCache {
    entries: HashMap<String, (DiscoveredScale, Instant)>,
    expiry: Duration,
}

impl DeviceCache {
    /// Create an empty cache whose entries live for `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            expiry,
        }
    }

    /// Remember `device`, refreshing its timestamp.
    pub fn insert(&mut self, device: DiscoveredScale) {
        let key = normalize_identifier(&device.identifier);
        self.entries.insert(key, (device, Instant::now()));
    }

    /// Look up an unexpired entry by identifier or address.
    pub fn get(&self, identifier: &str) -> Option<DiscoveredScale> {
        let now = Instant::now();
        let fresh = |seen: &Instant| now.duration_since(*seen) < self.expiry;

        if let Some((device, seen)) = self.entries.get(&normalize_identifier(identifier))
            && fresh(seen)
        {
            return Some(device.clone());
        }
        self.entries
            .values()
            .find(|(device, seen)| fresh(seen) && device.matches(identifier))
            .map(|(device, _)| device.clone())
    }

    /// Drop expired entries.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        let expiry = self.expiry;
        self.entries
            .retain(|_, (_, seen)| now.duration_since(*seen) < expiry);
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::NoAddress(DeviceNotFoundReason::NoAdapter))
}

/// Describe a peripheral from its advertised properties.
async fn process_peripheral(peripheral: &Peripheral) -> Result<Option<DiscoveredScale>> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let id = peripheral.id();
    let address = properties.address.to_string();
    let name = properties.local_name.clone();
    let scale_type = name.as_deref().and_then(ScaleType::from_name);

    Ok(Some(DiscoveredScale {
        identifier: create_identifier(&address, &id),
        address,
        name,
        scale_type,
        rssi: properties.rssi,
    }))
}

/// Search the adapter's known peripherals for one matching `identifier`.
async fn find_peripheral_by_identifier(
    adapter: &Adapter,
    identifier: &str,
) -> Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if identifiers_match(&format_peripheral_id(&peripheral.id()), identifier) {
            debug!("Matched by peripheral ID: {}", identifier);
            return Ok(Some(peripheral));
        }
        if let Ok(Some(props)) = peripheral.properties().await
            && identifiers_match(&props.address.to_string(), identifier)
        {
            debug!("Matched by address: {}", props.address);
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

/// btleplug-backed [`Discovery`] and [`ScaleFactory`].
pub struct BleDiscovery {
    adapter: Adapter,
    cache: RwLock<DeviceCache>,
    connection: ConnectionConfig,
}

impl std::fmt::Debug for BleDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleDiscovery")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl BleDiscovery {
    /// Use the first Bluetooth adapter.
    pub async fn new(cache_expiry: Duration) -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?, cache_expiry))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter, cache_expiry: Duration) -> Self {
        Self {
            adapter,
            cache: RwLock::new(DeviceCache::new(cache_expiry)),
            connection: ConnectionConfig::default(),
        }
    }

    /// Set the connection settings given to created scales.
    #[must_use]
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Scan for `duration` and return every recognized scale seen.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredScale>> {
        info!("Starting BLE scan for {:?}...", duration);
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        self.stop_scan().await;

        let seen = self.collect().await?;
        let scales: Vec<_> = seen.into_iter().filter(|d| d.scale_type.is_some()).collect();
        info!("Scan complete. Found {} scale(s)", scales.len());
        Ok(scales)
    }

    /// Scan until a device satisfies `predicate` or `timeout` elapses.
    async fn scan_until<P>(
        &self,
        timeout: Duration,
        predicate: P,
    ) -> Result<Option<DiscoveredScale>>
    where
        P: Fn(&DiscoveredScale) -> bool,
    {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + timeout;

        let result = loop {
            match self.collect().await {
                Ok(seen) => {
                    if let Some(device) = seen.into_iter().find(|d| predicate(d)) {
                        break Ok(Some(device));
                    }
                }
                Err(e) => break Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                break Ok(None);
            }
            sleep(SCAN_POLL_INTERVAL.min(deadline - now)).await;
        };

        self.stop_scan().await;
        result
    }

    /// Describe every peripheral the adapter knows and refresh the cache.
    async fn collect(&self) -> Result<Vec<DiscoveredScale>> {
        let peripherals = self.adapter.peripherals().await?;
        let mut seen = Vec::with_capacity(peripherals.len());
        for peripheral in &peripherals {
            match process_peripheral(peripheral).await {
                Ok(Some(device)) => seen.push(device),
                Ok(None) => {}
                Err(e) => debug!("Error processing peripheral: {}", e),
            }
        }

        let mut cache = self.cache.write().await;
        cache.purge_expired();
        for device in &seen {
            cache.insert(device.clone());
        }
        Ok(seen)
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }
}

#[async_trait]
impl Discovery for BleDiscovery {
    async fn find_first_matching(
        &self,
        prefixes: &[&str],
        timeout: Duration,
    ) -> Result<Option<DiscoveredScale>> {
        info!("Scanning up to {:?} for {:?}", timeout, prefixes);
        let found = self
            .scan_until(timeout, |d| d.name_matches(prefixes))
            .await?;
        match &found {
            Some(device) => info!("Found {:?} at {}", device.name, device.identifier),
            None => info!("No matching scale found"),
        }
        Ok(found)
    }

    async fn resolve_cached(&self, identifier: &str) -> Option<DiscoveredScale> {
        self.cache.read().await.get(identifier)
    }

    async fn scan_for_address(
        &self,
        identifier: &str,
        timeout: Duration,
    ) -> Result<DiscoveredScale> {
        info!("Scanning up to {:?} for {}", timeout, identifier);
        self.scan_until(timeout, |d| d.matches(identifier))
            .await?
            .ok_or_else(|| Error::device_not_found(identifier))
    }
}

#[async_trait]
impl ScaleFactory for BleDiscovery {
    async fn create(&self, device: &DiscoveredScale) -> Result<SharedScale> {
        let scale_type = device
            .scale_type
            .or_else(|| device.name.as_deref().and_then(ScaleType::from_name))
            .ok_or_else(|| {
                Error::instantiation(
                    &device.identifier,
                    format!("unrecognized scale name {:?}", device.name),
                )
            })?;

        let peripheral = find_peripheral_by_identifier(&self.adapter, &device.identifier)
            .await?
            .ok_or_else(|| {
                Error::instantiation(
                    &device.identifier,
                    "peripheral is no longer known to the adapter",
                )
            })?;

        let scale = BleScale::new(peripheral, device, scale_type, self.connection.clone());
        Ok(Arc::new(scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_scale_recognizes_type() {
        let d = DiscoveredScale::new("AA:BB:CC:DD:EE:FF", Some("Skale 12"));
        assert_eq!(d.scale_type, Some(ScaleType::AtomaxSkaleII));

        let d = DiscoveredScale::new("AA:BB:CC:DD:EE:FF", Some("Kettle"));
        assert_eq!(d.scale_type, None);
    }

    #[test]
    fn test_discovered_scale_matching() {
        let d = DiscoveredScale::new("AA:BB:CC:DD:EE:FF", Some("Decent Scale"));
        assert!(d.matches("aabbccddeeff"));
        assert!(!d.matches("11:22:33:44:55:66"));
        assert!(d.name_matches(&["Skale", "Decent Scale"]));
        assert!(!d.name_matches(&["Skale"]));
        assert!(!DiscoveredScale::new("x", None).name_matches(&["Skale"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_lookup_and_expiry() {
        let mut cache = DeviceCache::new(Duration::from_secs(300));
        cache.insert(DiscoveredScale::new("AA:BB:CC:DD:EE:FF", Some("Skale")));

        assert!(cache.get("aa:bb:cc:dd:ee:ff").is_some());
        assert!(cache.get("11:22:33:44:55:66").is_none());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("AA:BB:CC:DD:EE:FF").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("AA:BB:CC:DD:EE:FF").is_none());

        assert_eq!(cache.len(), 1);
        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_reinsert_refreshes() {
        let mut cache = DeviceCache::new(Duration::from_secs(10));
        cache.insert(DiscoveredScale::new("AA:BB", Some("Skale")));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert(DiscoveredScale::new("AA:BB", Some("Skale")));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(cache.get("AA:BB").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_matches_by_address() {
        let mut cache = DeviceCache::new(Duration::from_secs(10));
        let mut device = DiscoveredScale::new("5f1a0c2e-peripheral", Some("Skale"));
        device.address = "AA:BB:CC:DD:EE:FF".into();
        cache.insert(device);

        assert!(cache.get("AA:BB:CC:DD:EE:FF").is_some());
    }
}
