//! Seams to the BLE stack and to the host
//!
//! [`Transport`] is implemented by the BLE controller crate (btleplug) and
//! by in-memory fakes in tests. [`LockListener`] receives everything the
//! handler wants the host to know.

use std::future::Future;

use secuyou_proto::GattCharacteristic;

use crate::LockUpdate;

/// GATT operations on a connected lock
///
/// Every future resolves once the lock acknowledged the operation.
pub trait Transport: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read(
        &self,
        characteristic: GattCharacteristic,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;

    fn write(
        &self,
        characteristic: GattCharacteristic,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Enable notifications; enabling twice is harmless
    fn subscribe(
        &self,
        characteristic: GattCharacteristic,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether service discovery found `characteristic`
    fn has_characteristic(&self, characteristic: GattCharacteristic) -> bool;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Host side sink for status, channel and property updates
pub trait LockListener: Send + Sync + 'static {
    fn update(&self, update: LockUpdate);
}

impl LockListener for tokio::sync::mpsc::UnboundedSender<LockUpdate> {
    fn update(&self, update: LockUpdate) {
        // receiver gone means nobody is listening any more
        let _ = self.send(update);
    }
}
