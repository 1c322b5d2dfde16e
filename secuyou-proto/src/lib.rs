//! Secuyou wire protocol - device state and lock status frames
//!
//! Pure decoding of the fixed-layout frames the lock pushes over its key
//! service. Nothing in here performs I/O or holds state; unmapped enum
//! values resolve to an `Unknown` variant, except the device state which is
//! rejected with [`FrameError::UnknownDeviceState`].

pub mod ble;

pub use ble::GattCharacteristic;

/// Minimum length of a lock status frame
pub const LOCK_STATUS_LEN: usize = 5;

/// Number of challenge bytes used for the challenge response
pub const CHALLENGE_LEN: usize = 16;

/// Value of status byte 1 when the lock accepted our PIN
const PIN_VERIFIED: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: expected at least {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },
    #[error("unknown device state 0x{0:02x}")]
    UnknownDeviceState(u8),
}

/// Authentication state reported by the lock on the lock state characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    KeyGeneration,
    KeyConfirmation,
    KeyChecking,
    KeyBlocking,
}

impl DeviceState {
    pub fn from_byte(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(DeviceState::KeyGeneration),
            1 => Ok(DeviceState::KeyConfirmation),
            2 => Ok(DeviceState::KeyChecking),
            3 => Ok(DeviceState::KeyBlocking),
            other => Err(FrameError::UnknownDeviceState(other)),
        }
    }

    /// Decode a lock state frame, only byte 0 is significant
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        match data.first() {
            Some(value) => Self::from_byte(*value),
            None => Err(FrameError::MalformedFrame { expected: 1, actual: 0 }),
        }
    }
}

/// Bolt position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingMechanismPosition {
    Unlocked,
    Locked,
    LockingInProgress,
    Unknown,
}

impl LockingMechanismPosition {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => LockingMechanismPosition::Unlocked,
            1 => LockingMechanismPosition::Locked,
            2 => LockingMechanismPosition::LockingInProgress,
            _ => LockingMechanismPosition::Unknown,
        }
    }

    /// True when the lock reports a position we cannot act on
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            LockingMechanismPosition::LockingInProgress | LockingMechanismPosition::Unknown
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Good,
    Low,
    Critical,
    Empty,
    Unknown,
}

impl BatteryStatus {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => BatteryStatus::Good,
            1 => BatteryStatus::Low,
            2 => BatteryStatus::Critical,
            3 => BatteryStatus::Empty,
            _ => BatteryStatus::Unknown,
        }
    }

    /// Channel value, `None` when the lock did not report a known category
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            BatteryStatus::Good => Some("GOOD"),
            BatteryStatus::Low => Some("LOW"),
            BatteryStatus::Critical => Some("CRITICAL"),
            BatteryStatus::Empty => Some("EMPTY"),
            BatteryStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    Open,
}

impl HandleState {
    /// Both 0 and 1 mean closed on the wire, everything else is open
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 | 1 => HandleState::Closed,
            _ => HandleState::Open,
        }
    }
}

/// Composite byte 4 of the status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockFlags {
    pub home_lock_enabled: bool,
    pub rescue_state: bool,
}

impl LockFlags {
    /// Only 0..=3 are defined; anything else yields `None`
    pub fn from_byte(value: u8) -> Option<Self> {
        if value > 3 {
            return None;
        }
        Some(Self {
            home_lock_enabled: value & 0x01 != 0,
            rescue_state: value & 0x02 != 0,
        })
    }
}

/// Decoded lock status frame
///
/// ```text
/// byte 0  lock position
/// byte 1  0x10 when the PIN was verified
/// byte 2  battery status
/// byte 3  handle position (0/1 closed)
/// byte 4  bit 0 home lock, bit 1 rescue
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub lock_position: LockingMechanismPosition,
    pub pin_verified: bool,
    pub battery_status: BatteryStatus,
    pub handle_state: HandleState,
    pub flags: Option<LockFlags>,
}

impl LockStatus {
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < LOCK_STATUS_LEN {
            return Err(FrameError::MalformedFrame {
                expected: LOCK_STATUS_LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            lock_position: LockingMechanismPosition::from_byte(data[0]),
            pin_verified: data[1] == PIN_VERIFIED,
            battery_status: BatteryStatus::from_byte(data[2]),
            handle_state: HandleState::from_byte(data[3]),
            flags: LockFlags::from_byte(data[4]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn device_state_from_first_byte() {
        assert_eq!(DeviceState::from_bytes(&[0]), Ok(DeviceState::KeyGeneration));
        assert_eq!(DeviceState::from_bytes(&[1, 9, 9]), Ok(DeviceState::KeyConfirmation));
        assert_eq!(DeviceState::from_bytes(&[2]), Ok(DeviceState::KeyChecking));
        assert_eq!(DeviceState::from_bytes(&[3]), Ok(DeviceState::KeyBlocking));
        assert_eq!(
            DeviceState::from_bytes(&[4]),
            Err(FrameError::UnknownDeviceState(4))
        );
        assert_eq!(
            DeviceState::from_bytes(&[]),
            Err(FrameError::MalformedFrame { expected: 1, actual: 0 })
        );
    }

    #[test]
    fn short_status_frame_is_rejected() {
        assert_eq!(
            LockStatus::from_bytes(&[0, 0x10, 0, 0]),
            Err(FrameError::MalformedFrame { expected: 5, actual: 4 })
        );
    }

    #[test]
    fn decodes_frames_seen_in_the_wild() {
        // handle byte 2 reads as open, trailing bytes are ignored
        let first = [0x00, 0x10, 0x00, 0x02, 0x01, 0x00, 0xF6, 0xBB, 0x62, 0x42];
        let status = LockStatus::from_bytes(&first).unwrap();
        assert_eq!(status.lock_position, LockingMechanismPosition::Unlocked);
        assert!(status.pin_verified);
        assert_eq!(status.battery_status, BatteryStatus::Good);
        assert_eq!(status.handle_state, HandleState::Open);
        assert_eq!(
            status.flags,
            Some(LockFlags { home_lock_enabled: true, rescue_state: false })
        );

        let third = [0x02, 0x10, 0x00, 0x01, 0x01, 0x00];
        let status = LockStatus::from_bytes(&third).unwrap();
        assert_eq!(status.lock_position, LockingMechanismPosition::LockingInProgress);
        assert_eq!(status.handle_state, HandleState::Closed);

        let fourth = [0x00, 0x10, 0x00, 0x01, 0x03, 0x00];
        let status = LockStatus::from_bytes(&fourth).unwrap();
        assert_eq!(
            status.flags,
            Some(LockFlags { home_lock_enabled: true, rescue_state: true })
        );
    }

    #[test]
    fn unmapped_values_fall_back_to_unknown() {
        let status = LockStatus::from_bytes(&[0x07, 0x00, 0x09, 0x00, 0x00]).unwrap();
        assert_eq!(status.lock_position, LockingMechanismPosition::Unknown);
        assert!(!status.pin_verified);
        assert_eq!(status.battery_status, BatteryStatus::Unknown);
        assert_eq!(status.battery_status.as_str(), None);
    }

    #[test]
    fn flags_table() {
        let expected = [(false, false), (true, false), (false, true), (true, true)];
        for (value, (home, rescue)) in expected.into_iter().enumerate() {
            let flags = LockFlags::from_byte(value as u8).unwrap();
            assert_eq!(flags.home_lock_enabled, home);
            assert_eq!(flags.rescue_state, rescue);
        }
    }

    proptest! {
        #[test]
        fn handle_closed_only_for_zero_and_one(b3 in any::<u8>()) {
            let status = LockStatus::from_bytes(&[0, 0, 0, b3, 0]).unwrap();
            let closed = b3 == 0 || b3 == 1;
            prop_assert_eq!(status.handle_state == HandleState::Closed, closed);
        }

        #[test]
        fn flags_undefined_above_three(b4 in 4u8..=255) {
            let status = LockStatus::from_bytes(&[0, 0, 0, 0, b4]).unwrap();
            prop_assert_eq!(status.flags, None);
        }

        #[test]
        fn any_long_enough_frame_decodes(frame in proptest::collection::vec(any::<u8>(), 5..32)) {
            prop_assert!(LockStatus::from_bytes(&frame).is_ok());
        }
    }
}
