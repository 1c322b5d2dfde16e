//! BLE client for Secuyou locks
//!
//! Scanning, the btleplug [`Transport`] and the event pump that turns
//! adapter events and GATT notifications into [`LockHandle`] events.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use secuyou_node::{GattCharacteristic, LockHandle, Transport};
use secuyou_proto::ble::COMPANY_ID;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::BleError;

/// How long [`find_lock`] listens for advertisements
pub const SCAN_DURATION: Duration = Duration::from_secs(5);

/// Pause between failed connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pause before reconnecting after the lock dropped the link
///
/// Shorter than the handler's disconnect debounce so a quick reconnect
/// does not show up as offline.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct LockDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_secuyou: bool,
}

/// Secuyou locks advertise manufacturer data under their company id
fn is_secuyou(props: &PeripheralProperties) -> bool {
    props.manufacturer_data.contains_key(&COMPANY_ID)
}

fn role_of(uuid: Uuid) -> Option<GattCharacteristic> {
    GattCharacteristic::ALL
        .into_iter()
        .find(|c| Uuid::parse_str(c.uuid()).is_ok_and(|known| known == uuid))
}

/// Delay before the next connection attempt, `None` when the device can
/// never be driven
fn after_drop(found: &[GattCharacteristic]) -> Option<Duration> {
    GattCharacteristic::REQUIRED
        .iter()
        .all(|c| found.contains(c))
        .then_some(RECONNECT_BACKOFF)
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, BleError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BleError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. Secuyou locks have `is_secuyou = true`.
pub async fn scan(duration_secs: u64) -> Result<Vec<LockDevice>, BleError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let is_secuyou = is_secuyou(&props);
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            devices.push(LockDevice {
                name,
                address,
                rssi: props.rssi,
                is_secuyou,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a lock by address or name, or the first Secuyou lock seen
pub async fn find_lock(adapter: &Adapter, target: Option<&str>) -> Result<BleLock, BleError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(SCAN_DURATION).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.clone().unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) if !t.is_empty() => addr.eq_ignore_ascii_case(t) || name.contains(t),
                _ => is_secuyou(&props),
            };

            if matches {
                adapter.stop_scan().await?;
                info!("Found lock {name} ({addr})");
                return Ok(BleLock::new(peripheral));
            }
        }
    }

    adapter.stop_scan().await?;
    Err(BleError::DeviceNotFound)
}

/// A lock peripheral plus the characteristics found on the last discovery
#[derive(Debug, Clone)]
pub struct BleLock {
    peripheral: Peripheral,
    characteristics: Arc<Mutex<BTreeMap<GattCharacteristic, Characteristic>>>,
}

impl BleLock {
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::default(),
        }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    fn discovered(&self) -> Vec<GattCharacteristic> {
        self.table().keys().copied().collect()
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<GattCharacteristic, Characteristic>> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn characteristic(&self, role: GattCharacteristic) -> Result<Characteristic, BleError> {
        self.table()
            .get(&role)
            .cloned()
            .ok_or(BleError::CharacteristicNotFound(role))
    }

    async fn discover(&self) -> Result<(), BleError> {
        self.peripheral.discover_services().await?;
        let found: BTreeMap<_, _> = self
            .peripheral
            .characteristics()
            .into_iter()
            .filter_map(|c| role_of(c.uuid).map(|role| (role, c)))
            .collect();
        debug!("Discovered {:?}", found.keys().collect::<Vec<_>>());
        *self.table() = found;
        Ok(())
    }

    /// Connect if needed, discover services and tell the handler
    ///
    /// The notification stream is opened before the handler hears about the
    /// services, so the challenge sent during the handshake always has a
    /// listener.
    async fn establish(&self, handle: &LockHandle) -> Result<Notifications, BleError> {
        if !self.peripheral.is_connected().await? {
            info!("Connecting to {}", self.address());
            self.peripheral.connect().await?;
        }
        handle.connected()?;
        self.discover().await?;
        let notifications = self.peripheral.notifications().await?;
        handle.services_discovered()?;
        Ok(notifications)
    }
}

impl Transport for BleLock {
    type Error = BleError;

    async fn read(&self, role: GattCharacteristic) -> Result<Vec<u8>, BleError> {
        let characteristic = self.characteristic(role)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, role: GattCharacteristic, payload: &[u8]) -> Result<(), BleError> {
        let characteristic = self.characteristic(role)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, role: GattCharacteristic) -> Result<(), BleError> {
        let characteristic = self.characteristic(role)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    fn has_characteristic(&self, role: GattCharacteristic) -> bool {
        self.table().contains_key(&role)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Keep `lock` connected and feed its events to `handle`
///
/// Reconnects after every drop. Returns `Ok` once the handler has stopped
/// or the adapter event stream ends, and [`BleError::UnsupportedDevice`]
/// when the peripheral lacks the lock characteristics.
pub async fn drive(adapter: Adapter, lock: BleLock, handle: LockHandle) -> Result<(), BleError> {
    match pump(&adapter, &lock, &handle).await {
        Err(BleError::HandlerClosed(_)) => Ok(()),
        other => other,
    }
}

async fn pump(adapter: &Adapter, lock: &BleLock, handle: &LockHandle) -> Result<(), BleError> {
    let mut central = adapter.events().await?;
    let id = lock.peripheral.id();

    loop {
        let mut notifications = match lock.establish(handle).await {
            Ok(notifications) => notifications,
            Err(e @ BleError::HandlerClosed(_)) => return Err(e),
            Err(e) => {
                warn!("Connection to {} failed: {e}", lock.address());
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        loop {
            tokio::select! {
                Some(notification) = notifications.next() => {
                    match role_of(notification.uuid) {
                        Some(role) => handle.notification(role, notification.value)?,
                        None => debug!("Notification from unknown characteristic {}", notification.uuid),
                    }
                }
                event = central.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(peer)) if peer == id => break,
                    Some(_) => {}
                    None => return Ok(()),
                },
            }
        }

        let Some(delay) = after_drop(&lock.discovered()) else {
            // the handler has already reported it unsupported
            warn!("{} is not a supported lock, not reconnecting", lock.address());
            return Err(BleError::UnsupportedDevice);
        };
        handle.disconnected()?;
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_from_discovered_uuids() {
        let status = Uuid::parse_str("B1DE1529-85EF-37CC-00C8-A3CF3412A548").unwrap();
        assert_eq!(role_of(status), Some(GattCharacteristic::LockStatus));

        let model = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
        assert_eq!(role_of(model), Some(GattCharacteristic::ModelNumber));

        let battery_level = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
        assert_eq!(role_of(battery_level), None);
    }

    #[test]
    fn reconnect_only_supported_locks() {
        assert_eq!(
            after_drop(&GattCharacteristic::ALL),
            Some(RECONNECT_BACKOFF)
        );
        assert_eq!(
            after_drop(&[
                GattCharacteristic::LockState,
                GattCharacteristic::LockStatus
            ]),
            None
        );
        assert_eq!(after_drop(&[]), None);
        assert!(RECONNECT_BACKOFF < secuyou_node::DISCONNECT_DEBOUNCE);
    }

    #[test]
    fn secuyou_by_manufacturer_data() {
        let mut props = PeripheralProperties::default();
        assert!(!is_secuyou(&props));
        props.manufacturer_data.insert(COMPANY_ID, vec![0x01]);
        assert!(is_secuyou(&props));
    }
}
