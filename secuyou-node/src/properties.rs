//! Device information read once per connection

use secuyou_proto::GattCharacteristic;

/// Informational properties of the lock
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceProperties {
    pub model_id: Option<String>,
    pub hardware_version: Option<String>,
    pub firmware_version: Option<String>,
    pub vendor: Option<String>,
    pub serial_number: Option<String>,
    pub name: Option<String>,
}

impl DeviceProperties {
    /// Characteristics read to fill the properties
    pub const SOURCES: [GattCharacteristic; 6] = [
        GattCharacteristic::ModelNumber,
        GattCharacteristic::HardwareRevision,
        GattCharacteristic::ManufacturerName,
        GattCharacteristic::SerialNumber,
        GattCharacteristic::Name,
        GattCharacteristic::FirmwareRevision,
    ];

    /// Store the raw value read from `characteristic`
    pub fn set(&mut self, characteristic: GattCharacteristic, data: &[u8]) {
        match characteristic {
            GattCharacteristic::ModelNumber => self.model_id = scaled(data, 100.0),
            GattCharacteristic::HardwareRevision => self.hardware_version = scaled(data, 10.0),
            GattCharacteristic::FirmwareRevision => self.firmware_version = text(data),
            GattCharacteristic::ManufacturerName => self.vendor = text(data),
            GattCharacteristic::SerialNumber => self.serial_number = text(data),
            GattCharacteristic::Name => self.name = text(data),
            _ => {}
        }
    }
}

fn text(data: &[u8]) -> Option<String> {
    let s = String::from_utf8_lossy(data);
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// The lock reports model and hardware revision as integers, e.g. "120"
/// for model 1.2
fn scaled(data: &[u8], divisor: f32) -> Option<String> {
    let value: f32 = text(data)?.parse().ok()?;
    let scaled = value / divisor;
    if scaled.fract() == 0.0 {
        Some(format!("{scaled:.1}"))
    } else {
        Some(scaled.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_values() {
        let mut props = DeviceProperties::default();
        props.set(GattCharacteristic::ModelNumber, b"120");
        props.set(GattCharacteristic::HardwareRevision, b"20\0");
        assert_eq!(props.model_id.as_deref(), Some("1.2"));
        assert_eq!(props.hardware_version.as_deref(), Some("2.0"));
    }

    #[test]
    fn plain_strings() {
        let mut props = DeviceProperties::default();
        props.set(GattCharacteristic::ManufacturerName, b"NA");
        props.set(GattCharacteristic::SerialNumber, b"SN0001\0\0");
        props.set(GattCharacteristic::Name, b"Front door");
        props.set(GattCharacteristic::FirmwareRevision, b" 3.1.4 ");
        assert_eq!(props.vendor.as_deref(), Some("NA"));
        assert_eq!(props.serial_number.as_deref(), Some("SN0001"));
        assert_eq!(props.name.as_deref(), Some("Front door"));
        assert_eq!(props.firmware_version.as_deref(), Some("3.1.4"));
    }

    #[test]
    fn garbage_is_skipped() {
        let mut props = DeviceProperties::default();
        props.set(GattCharacteristic::ModelNumber, b"abc");
        props.set(GattCharacteristic::Name, b"");
        props.set(GattCharacteristic::LockStatus, b"ignored");
        assert_eq!(props, DeviceProperties::default());
    }
}
