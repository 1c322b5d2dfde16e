use secuyou_node::{GattCharacteristic, HandlerClosed};

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("bluetooth: {0}")]
    Btleplug(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no Secuyou lock found")]
    DeviceNotFound,
    #[error("device lacks the lock characteristics, not a supported lock")]
    UnsupportedDevice,
    #[error("characteristic {0:?} not discovered on the lock")]
    CharacteristicNotFound(GattCharacteristic),
    #[error(transparent)]
    HandlerClosed(#[from] HandlerClosed),
}
