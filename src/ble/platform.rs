//! `btleplug`-backed transport.
//!
//! Locates the peripheral by scanning, holds the link, runs GATT operations
//! and forwards notifications and link loss as [`TransportEvent`]s.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::topology::{
    CharacteristicHandle, CharacteristicProperties, DiscoveredCharacteristic, DiscoveredService,
};
use crate::ble::transport::{Transport, TransportEvent};
use crate::ble::uuids::is_lbs_characteristic;
use crate::error::{Error, Result};
use crate::session::{Operation, OperationKind};

/// Interval between peripheral list polls while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Transport over the platform BLE stack.
pub struct BtleplugTransport {
    /// The BLE adapter.
    adapter: Adapter,
    /// The connected peripheral.
    peripheral: RwLock<Option<Peripheral>>,
    /// Channel for transport events.
    event_tx: broadcast::Sender<TransportEvent>,
    /// Notification and link-loss listener tasks.
    listeners: Mutex<Vec<JoinHandle<()>>>,
    /// How long to scan for the peripheral.
    scan_timeout: Duration,
}

impl BtleplugTransport {
    /// Create a transport on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, scan_timeout))
    }

    /// Create a transport with a specific adapter.
    pub fn with_adapter(adapter: Adapter, scan_timeout: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            adapter,
            peripheral: RwLock::new(None),
            event_tx,
            listeners: Mutex::new(Vec::new()),
            scan_timeout,
        }
    }

    /// Get the connected peripheral.
    fn current(&self) -> Result<Peripheral> {
        self.peripheral.read().clone().ok_or(Error::NotConnected)
    }

    /// Scan until a peripheral with the given address or local name shows up.
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        info!("Scanning for {}", address);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let found = tokio::time::timeout(self.scan_timeout, async {
            loop {
                for peripheral in self.adapter.peripherals().await? {
                    if Self::matches(&peripheral, address).await {
                        return Ok::<_, Error>(peripheral);
                    }
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        })
        .await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Ok(result) => result,
            Err(_) => Err(Error::DeviceNotFound {
                address: address.to_string(),
            }),
        }
    }

    async fn matches(peripheral: &Peripheral, address: &str) -> bool {
        if peripheral.address().to_string().eq_ignore_ascii_case(address) {
            return true;
        }

        match peripheral.properties().await {
            Ok(Some(properties)) => properties.local_name.as_deref() == Some(address),
            _ => false,
        }
    }

    /// Look up the platform characteristic behind a handle.
    fn characteristic(
        peripheral: &Peripheral,
        handle: &CharacteristicHandle,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: handle.uuid.to_string(),
            })
    }

    /// Start forwarding notifications and link loss for a peripheral.
    ///
    /// Both streams are opened before any task is spawned, so a failure
    /// leaves nothing running.
    async fn start_listeners(&self, peripheral: &Peripheral) -> Result<()> {
        let mut notifications = peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;

        let notification_tx = self.event_tx.clone();

        let notification_task = tokio::spawn(async move {
            debug!("Notification listener started");

            while let Some(notification) = notifications.next().await {
                if !is_lbs_characteristic(&notification.uuid) {
                    continue;
                }

                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );

                let _ = notification_tx.send(TransportEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                });
            }

            debug!("Notification listener stopped");
        });

        let peripheral_id = peripheral.id();
        let link_tx = self.event_tx.clone();

        let link_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("Peripheral disconnected");
                        let _ = link_tx.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        let mut listeners = self.listeners.lock();
        listeners.push(notification_task);
        listeners.push(link_task);

        Ok(())
    }

    fn stop_listeners(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn connect(&self, address: &str) -> Result<()> {
        self.stop_listeners();

        let peripheral = self.find_peripheral(address).await?;

        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            peripheral.connect().await.map_err(|e| Error::ConnectionFailed {
                reason: e.to_string(),
            })?;
            info!("Successfully connected to {}", address);
        }

        attach_or_release(self.start_listeners(&peripheral), async {
            peripheral.disconnect().await.map_err(Error::from)
        })
        .await?;
        *self.peripheral.write() = Some(peripheral);

        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        let peripheral = self.current()?;
        peripheral.discover_services().await?;

        let services: Vec<DiscoveredService> = peripheral
            .services()
            .into_iter()
            .map(|service| {
                debug!("Found service: {}", service.uuid);
                DiscoveredService {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .iter()
                        .map(|c| DiscoveredCharacteristic {
                            uuid: c.uuid,
                            properties: properties_from_flags(c.properties),
                        })
                        .collect(),
                }
            })
            .collect();

        debug!("Discovered {} services", services.len());

        Ok(services)
    }

    async fn dispatch(&self, operation: &Operation) -> Result<Vec<u8>> {
        let peripheral = self.current()?;
        let characteristic = Self::characteristic(&peripheral, operation.target())?;

        match operation.kind() {
            OperationKind::Read => {
                let data = peripheral.read(&characteristic).await?;
                trace!("Read {} bytes from {}", data.len(), characteristic.uuid);
                Ok(data)
            }
            OperationKind::Write => {
                let value = operation.payload().ok_or_else(|| Error::InvalidData {
                    context: format!("Write {} has no payload", operation.id()),
                })?;
                peripheral
                    .write(&characteristic, &[value], WriteType::WithResponse)
                    .await?;
                trace!("Wrote {:#04x} to {}", value, characteristic.uuid);
                Ok(vec![value])
            }
            OperationKind::EnableNotifications => {
                peripheral.subscribe(&characteristic).await?;
                debug!("Subscribed to notifications from {}", characteristic.uuid);
                Ok(Vec::new())
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_listeners();

        let Some(peripheral) = self.peripheral.write().take() else {
            return Ok(());
        };

        match peripheral.disconnect().await {
            Ok(_) => {
                info!("Successfully disconnected");
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}

/// Run `attach`; if it fails, run `release` and return the attach error.
///
/// Used to drop a freshly established link that could not be wired up.
async fn attach_or_release<A, R>(attach: A, release: R) -> Result<()>
where
    A: Future<Output = Result<()>>,
    R: Future<Output = Result<()>>,
{
    let Err(e) = attach.await else {
        return Ok(());
    };

    warn!("Failed to start listeners, dropping link: {}", e);
    if let Err(release_error) = release.await {
        error!("Failed to disconnect: {}", release_error);
    }
    Err(e)
}

/// Map platform property flags onto the properties the session cares about.
fn properties_from_flags(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        notify: flags.contains(CharPropFlags::NOTIFY),
    }
}
