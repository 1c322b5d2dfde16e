//! Secuyou Node - Client side logic for Secuyou smart locks
//!
//! This crate holds everything between the raw GATT frames decoded by
//! secuyou-proto and the host: configuration, the challenge-response
//! cipher, the per-connection [`Session`] state machine, command dispatch,
//! the rescue policy and the [`LockHandler`] task that drives it all over a
//! [`Transport`].

mod channel;
mod cipher;
mod command;
mod config;
pub mod handler;
mod properties;
mod rescue;
pub mod session;
mod transport;

pub use channel::{Channel, ChannelState, CommandValue, UnknownChannel};
pub use cipher::{CryptoError, challenge_response};
pub use command::{CommandRejected, dispatch};
pub use config::{
    ConfigError, Credentials, KEY_LEN, LockConfig, PIN_LEN, SessionSettings, secuyou_home,
};
pub use handler::{
    DISCONNECT_DEBOUNCE, GATT_OP_TIMEOUT, HandlerClosed, LockEvent, LockHandle, LockHandler,
};
pub use properties::DeviceProperties;
pub use rescue::{RESCUE_SPACING, RESCUE_STEP_DELAY, RESCUE_TIMEOUT, RescuePolicy};
pub use session::{AuthenticationState, LockSnapshot, Session, SessionAction};
pub use transport::{LockListener, Transport};

pub use secuyou_proto::{
    BatteryStatus, DeviceState, FrameError, GattCharacteristic, HandleState, LockStatus,
    LockingMechanismPosition,
};

/// Why a lock is reported offline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
    /// The link dropped and did not come back within the debounce window
    Gone,
    /// Service discovery did not find the lock characteristics
    UnsupportedDevice(String),
}

impl std::fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfflineReason::Gone => write!(f, "Bluetooth connection to device lost"),
            OfflineReason::UnsupportedDevice(detail) => {
                write!(f, "Unsupported device or firmware ({detail})")
            }
        }
    }
}

/// Availability of the lock as seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Connected, handshake not finished yet
    Initializing(String),
    Online,
    /// Online without credentials, commands are rejected
    ReadOnly,
    Offline(OfflineReason),
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Initializing(detail) => write!(f, "UNKNOWN: {detail}"),
            Availability::Online => write!(f, "ONLINE"),
            Availability::ReadOnly => write!(f, "ONLINE: read-only, no valid pin configured"),
            Availability::Offline(reason) => write!(f, "OFFLINE: {reason}"),
        }
    }
}

/// Everything the handler reports to its [`LockListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockUpdate {
    Status(Availability),
    Channel(Channel, ChannelState),
    Properties(DeviceProperties),
}

impl std::fmt::Display for LockUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockUpdate::Status(status) => write!(f, "status {status}"),
            LockUpdate::Channel(channel, state) => write!(f, "{channel} = {state}"),
            LockUpdate::Properties(props) => write!(f, "properties {props:?}"),
        }
    }
}
