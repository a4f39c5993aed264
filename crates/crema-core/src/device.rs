//! Bluetooth scale connection.
//!
//! [`BleScale`] implements [`Scale`] on top of a btleplug peripheral. Once
//! connected it runs one background task that reads the notification stream,
//! decodes each packet with [`ScaleProtocol`] and publishes the result,
//! awaiting every `publish` before reading the next packet.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crema_types::{Connectivity, ScaleType, TareEvent, WeightSample};

use crate::bus::EventBus;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::protocol::{Notification, ScaleProtocol};
use crate::scan::DiscoveredScale;
use crate::traits::Scale;
use crate::util::now_secs;

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for BLE connection timeouts.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use crema_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20));
/// assert_eq!(config.connection_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for BLE write operations.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Running notification task of a connected scale.
struct Link {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Link {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// A Bluetooth espresso scale.
///
/// # Cleanup
///
/// Call [`Scale::decommission`] before dropping the scale. A scale dropped
/// while still linked logs a warning and stops its notification task.
pub struct BleScale {
    peripheral: Peripheral,
    address: String,
    name: Option<String>,
    scale_type: ScaleType,
    protocol: ScaleProtocol,
    config: ConnectionConfig,
    connectivity: Arc<AtomicU8>,
    weight_updates: EventBus<WeightSample>,
    tare_events: EventBus<TareEvent>,
    link: Mutex<Option<Link>>,
    decommissioned: AtomicBool,
}

impl std::fmt::Debug for BleScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleScale")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("scale_type", &self.scale_type)
            .field("connectivity", &self.connectivity())
            .finish_non_exhaustive()
    }
}

impl BleScale {
    /// Wrap a discovered peripheral. Does not connect.
    pub fn new(
        peripheral: Peripheral,
        device: &DiscoveredScale,
        scale_type: ScaleType,
        config: ConnectionConfig,
    ) -> Self {
        let label = device.name.clone().unwrap_or_else(|| device.identifier.clone());
        Self {
            peripheral,
            address: device.identifier.clone(),
            name: device.name.clone(),
            scale_type,
            protocol: ScaleProtocol::for_type(scale_type),
            config,
            connectivity: Arc::new(AtomicU8::new(Connectivity::NotConnected as u8)),
            weight_updates: EventBus::new(&format!("{label} weight-update")),
            tare_events: EventBus::new(&format!("{label} tare-seen")),
            link: Mutex::new(None),
            decommissioned: AtomicBool::new(false),
        }
    }

    fn set_connectivity(&self, state: Connectivity) {
        self.connectivity.store(state as u8, Ordering::SeqCst);
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                Error::connection_failed(
                    Some(self.address.clone()),
                    ConnectionFailureReason::MissingCharacteristic(uuid.to_string()),
                )
            })
    }

    /// Connect, discover services, subscribe and start the notification task.
    async fn establish(&self) -> Result<Link> {
        info!("Connecting to {}...", self.address);
        bounded_connect(
            &self.address,
            self.config.connection_timeout,
            self.peripheral.connect(),
        )
        .await?;
        self.set_connectivity(Connectivity::Connected);

        timeout(self.config.discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let notify = self.find_characteristic(self.protocol.notify_characteristic())?;
        self.peripheral.subscribe(&notify).await?;
        let stream = self.peripheral.notifications().await?;

        for command in self.protocol.init_commands() {
            if let Err(e) = self.write_command(&command).await {
                warn!("Init command {:02X?} failed on {}: {}", command, self.address, e);
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_notifications(
            stream,
            notify.uuid,
            self.protocol,
            self.weight_updates.clone(),
            self.tare_events.clone(),
            Arc::clone(&self.connectivity),
            cancel.clone(),
            self.address.clone(),
        ));
        Ok(Link { cancel, task })
    }

    async fn write_command(&self, data: &[u8]) -> Result<()> {
        let characteristic = self.find_characteristic(self.protocol.command_characteristic())?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(&characteristic, data, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| Error::timeout("write command", self.config.write_timeout))??;
        Ok(())
    }
}

/// Run a link attempt within `limit`, classifying the failure.
async fn bounded_connect<F>(address: &str, limit: Duration, connect: F) -> Result<()>
where
    F: Future<Output = btleplug::Result<()>>,
{
    let reason = match timeout(limit, connect).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => ConnectionFailureReason::BleError(e.to_string()),
        Err(_) => ConnectionFailureReason::Timeout,
    };
    Err(Error::connection_failed(Some(address.to_string()), reason))
}

/// Forward decoded notifications to the scale's event sources until the
/// stream ends or `cancel` fires.
#[allow(clippy::too_many_arguments)]
async fn pump_notifications(
    mut stream: NotificationStream,
    characteristic: Uuid,
    protocol: ScaleProtocol,
    weight_updates: EventBus<WeightSample>,
    tare_events: EventBus<TareEvent>,
    connectivity: Arc<AtomicU8>,
    cancel: CancellationToken,
    address: String,
) {
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(n) => n,
                None => {
                    info!("Notification stream from {} ended; link lost", address);
                    connectivity.store(Connectivity::NotConnected as u8, Ordering::SeqCst);
                    break;
                }
            },
        };
        if notification.uuid != characteristic {
            continue;
        }

        // Neither supported scale timestamps its packets.
        let arrival = now_secs();
        match protocol.decode(&notification.value) {
            Ok(Some(Notification::Weight(weight))) => {
                weight_updates
                    .publish(WeightSample {
                        scale_time: arrival,
                        arrival_time: arrival,
                        weight,
                    })
                    .await;
            }
            Ok(Some(Notification::Tare)) => {
                tare_events
                    .publish(TareEvent {
                        scale_time: arrival,
                        arrival_time: arrival,
                    })
                    .await;
            }
            Ok(None) => trace!("Ignoring packet {:02X?}", notification.value),
            Err(e) => debug!("Undecodable packet from {}: {}", address, e),
        }
    }
}

#[async_trait]
impl Scale for BleScale {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::try_from(self.connectivity.load(Ordering::SeqCst))
            .unwrap_or(Connectivity::NotConnected)
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        if self.decommissioned.load(Ordering::SeqCst) {
            return Err(Error::Decommissioned);
        }
        let mut link = self.link.lock().await;
        if link.is_some() && self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }
        if let Some(stale) = link.take() {
            stale.stop();
        }

        self.set_connectivity(Connectivity::Connecting);
        match self.establish().await {
            Ok(new_link) => {
                *link = Some(new_link);
                self.set_connectivity(Connectivity::Ready);
                info!("Connected");
                Ok(())
            }
            Err(e) => {
                self.set_connectivity(Connectivity::NotConnected);
                if let Err(de) = self.peripheral.disconnect().await {
                    debug!("Cleanup disconnect after failed connect: {}", de);
                }
                Err(e)
            }
        }
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let current = link.take();
        if self.connectivity() == Connectivity::NotConnected {
            if let Some(stale) = current {
                stale.stop();
            }
            return Err(Error::NotConnected);
        }

        self.set_connectivity(Connectivity::Disconnecting);
        if let Some(active) = current {
            active.stop();
        }
        let result = self
            .peripheral
            .disconnect()
            .await
            .map_err(|e| Error::disconnect_failed(&self.address, e.to_string()));
        self.set_connectivity(Connectivity::NotConnected);
        result
    }

    async fn decommission(&self) {
        if self.decommissioned.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Decommissioning {}", self.address);
        if let Some(active) = self.link.lock().await.take() {
            active.stop();
        }
        if self.is_connected()
            && let Err(e) = self.peripheral.disconnect().await
        {
            debug!("Disconnect during decommission failed: {}", e);
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

impl Drop for BleScale {
    fn drop(&mut self) {
        if self.decommissioned.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut link) = self.link.try_lock()
            && let Some(active) = link.take()
        {
            warn!(
                address = %self.address,
                "Scale dropped without decommission(); stopping notification task"
            );
            active.stop();
        }
    }
}
