//! BLE GATT Service Protocol Constants for Secuyou Smart Locks
//!
//! This module defines the service and characteristic UUIDs, the command
//! bytes written to the lock, and the channel ids exposed to the host.

/// Bluetooth SIG company id advertised in the lock's manufacturer data
pub const COMPANY_ID: u16 = 724;

/// Lock Status Characteristic UUID (read/notify/write)
///
/// Carries the 5 byte status frame, the device challenge and the
/// encrypted challenge response.
pub const LOCK_STATUS_UUID: &str = "b1de1529-85ef-37cc-00c8-a3cf3412a548";

/// Confirm/Command Characteristic UUID (write)
pub const CONFIRM_UUID: &str = "b1de1530-85ef-37cc-00c8-a3cf3412a548";

/// Lock State Characteristic UUID (read/notify), 1 byte device state
pub const LOCK_STATE_UUID: &str = "b1de1531-85ef-37cc-00c8-a3cf3412a548";

/// Lock Name Characteristic UUID (read)
pub const NAME_UUID: &str = "b1de1532-85ef-37cc-00c8-a3cf3412a548";

/// Device Information Service: Model Number String
pub const MODEL_NUMBER_UUID: &str = "00002a24-0000-1000-8000-00805f9b34fb";

/// Device Information Service: Serial Number String
pub const SERIAL_NUMBER_UUID: &str = "00002a25-0000-1000-8000-00805f9b34fb";

/// Device Information Service: Firmware Revision String
pub const FIRMWARE_REVISION_UUID: &str = "00002a26-0000-1000-8000-00805f9b34fb";

/// Device Information Service: Hardware Revision String
pub const HARDWARE_REVISION_UUID: &str = "00002a27-0000-1000-8000-00805f9b34fb";

/// Device Information Service: Manufacturer Name String (reported as "NA")
pub const MANUFACTURER_NAME_UUID: &str = "00002a29-0000-1000-8000-00805f9b34fb";

/// Every characteristic the client talks to, by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GattCharacteristic {
    /// Device (authentication) state, 1 byte
    LockState,
    /// Lock status frame / challenge / challenge response
    LockStatus,
    /// Write-only command byte
    Confirm,
    Name,
    ModelNumber,
    SerialNumber,
    FirmwareRevision,
    HardwareRevision,
    ManufacturerName,
}

impl GattCharacteristic {
    /// Characteristics that must be present for the lock to be usable
    pub const REQUIRED: [GattCharacteristic; 3] = [
        GattCharacteristic::LockState,
        GattCharacteristic::LockStatus,
        GattCharacteristic::Confirm,
    ];

    pub const ALL: [GattCharacteristic; 9] = [
        GattCharacteristic::LockState,
        GattCharacteristic::LockStatus,
        GattCharacteristic::Confirm,
        GattCharacteristic::Name,
        GattCharacteristic::ModelNumber,
        GattCharacteristic::SerialNumber,
        GattCharacteristic::FirmwareRevision,
        GattCharacteristic::HardwareRevision,
        GattCharacteristic::ManufacturerName,
    ];

    pub fn uuid(&self) -> &'static str {
        match self {
            GattCharacteristic::LockState => LOCK_STATE_UUID,
            GattCharacteristic::LockStatus => LOCK_STATUS_UUID,
            GattCharacteristic::Confirm => CONFIRM_UUID,
            GattCharacteristic::Name => NAME_UUID,
            GattCharacteristic::ModelNumber => MODEL_NUMBER_UUID,
            GattCharacteristic::SerialNumber => SERIAL_NUMBER_UUID,
            GattCharacteristic::FirmwareRevision => FIRMWARE_REVISION_UUID,
            GattCharacteristic::HardwareRevision => HARDWARE_REVISION_UUID,
            GattCharacteristic::ManufacturerName => MANUFACTURER_NAME_UUID,
        }
    }

    /// Reverse lookup, case insensitive
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid().eq_ignore_ascii_case(uuid))
    }
}

/// BLE Command bytes
pub mod commands {
    /// Ask the lock to generate a challenge (written to the confirm characteristic)
    pub const GENERATE_CHALLENGE: u8 = 0x01;

    /// Acknowledge that the challenge was received
    pub const CHALLENGE_RECEIVED: u8 = 0x00;

    /// Toggle the bolt
    pub const TOGGLE_LOCK: u8 = 0x01;

    /// Toggle home lock mode (-1 as a signed byte)
    pub const TOGGLE_HOME_LOCK: u8 = 0xFF;
}

/// Channel ids exposed to the host
pub mod channels {
    pub const LOCK: &str = "lock";
    pub const HOME_LOCK: &str = "home_lock";
    pub const BATTERY: &str = "battery";
    pub const HANDLE_POSITION: &str = "handle_position";
}

#[cfg(test)]
mod tests {
    use super::GattCharacteristic;

    #[test]
    fn uuid_lookup_is_case_insensitive() {
        assert_eq!(
            GattCharacteristic::from_uuid("B1DE1529-85EF-37CC-00C8-A3CF3412A548"),
            Some(GattCharacteristic::LockStatus)
        );
        assert_eq!(
            GattCharacteristic::from_uuid("00002A24-0000-1000-8000-00805F9B34FB"),
            Some(GattCharacteristic::ModelNumber)
        );
        assert_eq!(GattCharacteristic::from_uuid("not-a-uuid"), None);
    }

    #[test]
    fn every_characteristic_round_trips() {
        for c in GattCharacteristic::ALL {
            assert_eq!(GattCharacteristic::from_uuid(c.uuid()), Some(c));
        }
    }
}
