//! Lock session state machine
//!
//! One [`Session`] exists per BLE connection. It holds the [`LockSnapshot`]
//! and decides, for every frame the lock sends, what has to be written or
//! read next. It never performs I/O: every method returns a list of
//! [`SessionAction`]s which the [`crate::handler`] task executes in order.
//!
//! # Handshake
//!
//! ```text
//!  read lock state == KeyGeneration
//!        │ write 0x01 to confirm, re-read lock state
//!        ↓
//!  lock status notification  = challenge
//!        │ write 0x00 to confirm
//!        ↓
//!  lock state notification KeyChecking
//!        │ write AES(challenge + pin) to lock status
//!        ↓
//!  lock state notification KeyConfirmation
//!        │ refresh status, start keepalive, online
//!        ↓
//!   Authenticated
//! ```
//!
//! Without a well formed PIN and key the session never authenticates: the
//! device state is forced to `KeyConfirmation`, the status is read once and
//! the lock is reported online read-only when that read decodes.

use std::time::{Duration, Instant};

use secuyou_proto::ble::commands;
use secuyou_proto::{
    BatteryStatus, DeviceState, GattCharacteristic, HandleState, LockStatus,
    LockingMechanismPosition,
};
use tracing::{debug, error, info, warn};

use crate::Availability;
use crate::channel::{Channel, ChannelState, CommandValue};
use crate::cipher::challenge_response;
use crate::command;
use crate::config::{Credentials, LockConfig, SessionSettings};
use crate::rescue::RescuePolicy;

/// Client side authentication progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationState {
    Unauthenticated,
    AuthenticationInProgress,
    Authenticated,
}

/// Effects requested by the session, executed by the driver in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write `payload` to `characteristic`
    Write {
        characteristic: GattCharacteristic,
        payload: Vec<u8>,
    },
    /// Read `characteristic` and feed the value back into the session
    Read(GattCharacteristic),
    /// Re-enable notifications and read the lock status, if still connected
    Refresh,
    /// (Re)start periodic refreshes
    StartKeepAlive(Duration),
    /// Run the double toggle rescue sequence
    StartRescue,
    /// Report availability to the host
    Status(Availability),
    /// Publish a channel value to the host
    Channel(Channel, ChannelState),
}

impl SessionAction {
    fn confirm(command: u8) -> Self {
        SessionAction::Write {
            characteristic: GattCharacteristic::Confirm,
            payload: vec![command],
        }
    }
}

/// Everything known about the lock on the current connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
    pub device_state: DeviceState,
    pub authentication_state: AuthenticationState,
    pub lock_position: LockingMechanismPosition,
    /// Position before the most recent status update
    pub previous_lock_position: LockingMechanismPosition,
    /// `None` until the first status frame
    pub handle_state: Option<HandleState>,
    pub battery_status: BatteryStatus,
    pub home_lock_enabled: bool,
    /// Rescue bit reported by the lock itself
    pub rescue_active: bool,
    pub pin_verified_by_device: bool,
    pub pending_challenge: Option<Vec<u8>>,
}

impl Default for LockSnapshot {
    fn default() -> Self {
        Self {
            device_state: DeviceState::KeyGeneration,
            authentication_state: AuthenticationState::Unauthenticated,
            lock_position: LockingMechanismPosition::Unknown,
            previous_lock_position: LockingMechanismPosition::Unknown,
            handle_state: None,
            battery_status: BatteryStatus::Unknown,
            home_lock_enabled: false,
            rescue_active: false,
            pin_verified_by_device: false,
            pending_challenge: None,
        }
    }
}

impl LockSnapshot {
    fn apply(&mut self, status: &LockStatus, treat_in_progress_as_locked: bool) {
        self.previous_lock_position = self.lock_position;
        self.lock_position = status.lock_position;
        if treat_in_progress_as_locked
            && status.lock_position == LockingMechanismPosition::LockingInProgress
        {
            warn!("Lock reported LockingInProgress, assuming Locked");
            self.lock_position = LockingMechanismPosition::Locked;
        }
        self.pin_verified_by_device = status.pin_verified;
        self.battery_status = status.battery_status;
        self.handle_state = Some(status.handle_state);
        // undefined flag values keep what we had
        if let Some(flags) = status.flags {
            self.home_lock_enabled = flags.home_lock_enabled;
            self.rescue_active = flags.rescue_state;
        }
    }
}

/// Per-connection lock state machine
#[derive(Debug, Clone)]
pub struct Session {
    snapshot: LockSnapshot,
    credentials: Option<Credentials>,
    settings: SessionSettings,
    // read-only mode is reported once the first status frame decodes
    announce_read_only: bool,
}

impl Session {
    /// `None` credentials put the session in read-only mode
    pub fn new(credentials: Option<Credentials>, settings: SessionSettings) -> Self {
        Self {
            snapshot: LockSnapshot::default(),
            credentials,
            settings,
            announce_read_only: false,
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        let credentials = match config.credentials() {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                debug!("Credentials unusable: {e}");
                None
            }
        };
        Self::new(credentials, config.session_settings())
    }

    pub fn snapshot(&self) -> &LockSnapshot {
        &self.snapshot
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.authentication_state == AuthenticationState::Authenticated
    }

    /// First read of the lock state characteristic after connecting
    pub fn handle_initial_state(&mut self, frame: &[u8]) -> Vec<SessionAction> {
        debug!("Initial lock state {}", hex(frame));

        let state = match DeviceState::from_bytes(frame) {
            Ok(state) => state,
            Err(e) => {
                warn!("Lock is in unexpected state: {e}");
                return vec![];
            }
        };
        self.snapshot.device_state = state;

        if state != DeviceState::KeyGeneration {
            warn!("Lock is in unexpected state {state:?}");
            return vec![];
        }

        if self.credentials.is_some() {
            info!("Starting authentication");
            self.snapshot.authentication_state = AuthenticationState::AuthenticationInProgress;
            vec![
                SessionAction::confirm(commands::GENERATE_CHALLENGE),
                SessionAction::Read(GattCharacteristic::LockState),
            ]
        } else {
            warn!(
                "Pin code is empty or of incorrect format - will not try to authenticate but quietly listen for updates"
            );
            self.snapshot.device_state = DeviceState::KeyConfirmation;
            self.announce_read_only = true;
            vec![SessionAction::Read(GattCharacteristic::LockStatus)]
        }
    }

    /// Lock state characteristic notification or re-read
    pub fn handle_device_state(&mut self, frame: &[u8]) -> Vec<SessionAction> {
        let state = match DeviceState::from_bytes(frame) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "Discarding lock state {}: {e}, keeping {:?}",
                    hex(frame),
                    self.snapshot.device_state
                );
                return vec![];
            }
        };
        self.snapshot.device_state = state;

        if self.snapshot.authentication_state != AuthenticationState::AuthenticationInProgress {
            return vec![];
        }

        match state {
            DeviceState::KeyChecking => self.send_challenge_response(),
            DeviceState::KeyConfirmation => {
                info!("Authentication complete, refreshing status");
                self.snapshot.authentication_state = AuthenticationState::Authenticated;
                let mut actions = vec![SessionAction::Refresh];
                if let Some(interval) = self.settings.keep_alive {
                    debug!("Scheduling polling every {}s", interval.as_secs());
                    actions.push(SessionAction::StartKeepAlive(interval));
                }
                actions.push(SessionAction::Status(Availability::Online));
                actions
            }
            _ => vec![],
        }
    }

    fn send_challenge_response(&mut self) -> Vec<SessionAction> {
        info!("Lock is ready for pin to be written");
        let Some(credentials) = &self.credentials else {
            return vec![];
        };
        let Some(challenge) = self.snapshot.pending_challenge.take() else {
            warn!("Lock asked for the pin but no challenge was received");
            return vec![];
        };
        match challenge_response(&challenge, &credentials.pin, &credentials.key) {
            Ok(response) => vec![SessionAction::Write {
                characteristic: GattCharacteristic::LockStatus,
                payload: response.to_vec(),
            }],
            Err(e) => {
                error!(
                    "Error doing pin encryption, check pin and encryption key configuration: {e}"
                );
                vec![]
            }
        }
    }

    /// Lock status characteristic notification or read
    ///
    /// While the handshake waits for a challenge the frame is the challenge;
    /// otherwise it is decoded as a status frame.
    pub fn handle_lock_status(
        &mut self,
        frame: &[u8],
        rescue: &mut RescuePolicy,
        now: Instant,
    ) -> Vec<SessionAction> {
        match self.snapshot.device_state {
            DeviceState::KeyGeneration
                if self.snapshot.authentication_state
                    == AuthenticationState::AuthenticationInProgress =>
            {
                info!("Received challenge from lock {}", hex(frame));
                self.snapshot.pending_challenge = Some(frame.to_vec());
                vec![SessionAction::confirm(commands::CHALLENGE_RECEIVED)]
            }
            DeviceState::KeyGeneration | DeviceState::KeyChecking | DeviceState::KeyConfirmation => {
                self.apply_status(frame, rescue, now)
            }
            DeviceState::KeyBlocking => {
                info!(
                    "Received status update {} in state {:?}",
                    hex(frame),
                    self.snapshot.device_state
                );
                vec![]
            }
        }
    }

    /// Status read at the end of a rescue; returns whether the bolt position
    /// is known again
    pub fn handle_rescue_status(
        &mut self,
        frame: &[u8],
        rescue: &mut RescuePolicy,
        now: Instant,
    ) -> (Vec<SessionAction>, bool) {
        let actions = self.apply_status(frame, rescue, now);
        let resolved = !self.snapshot.lock_position.is_indeterminate();
        (actions, resolved)
    }

    fn apply_status(
        &mut self,
        frame: &[u8],
        rescue: &mut RescuePolicy,
        now: Instant,
    ) -> Vec<SessionAction> {
        let status = match LockStatus::from_bytes(frame) {
            Ok(status) => status,
            Err(e) => {
                warn!("Discarding lock status {}: {e}", hex(frame));
                return vec![];
            }
        };
        self.snapshot
            .apply(&status, self.settings.treat_locking_in_progress_as_locked);
        debug!("Updated state: {:?}", self.snapshot);

        let mut actions = vec![];
        if std::mem::take(&mut self.announce_read_only) {
            info!("Read only mode");
            actions.push(SessionAction::Status(Availability::ReadOnly));
        }

        let snapshot = &self.snapshot;
        actions.extend([
            SessionAction::Channel(
                Channel::Battery,
                snapshot
                    .battery_status
                    .as_str()
                    .map(|s| ChannelState::Text(s.to_string()))
                    .unwrap_or(ChannelState::Undefined),
            ),
            SessionAction::Channel(
                Channel::HomeLock,
                ChannelState::on_off(snapshot.home_lock_enabled),
            ),
            SessionAction::Channel(
                Channel::HandlePosition,
                match status.handle_state {
                    HandleState::Closed => ChannelState::Closed,
                    HandleState::Open => ChannelState::Open,
                },
            ),
        ]);

        match snapshot.lock_position {
            LockingMechanismPosition::Locked => {
                actions.push(SessionAction::Channel(Channel::Lock, ChannelState::On));
            }
            LockingMechanismPosition::Unlocked => {
                actions.push(SessionAction::Channel(Channel::Lock, ChannelState::Off));
            }
            LockingMechanismPosition::LockingInProgress | LockingMechanismPosition::Unknown => {
                if rescue.try_begin(now) {
                    actions.push(SessionAction::StartRescue);
                } else {
                    actions.push(SessionAction::Channel(Channel::Lock, ChannelState::Undefined));
                }
            }
        }
        actions
    }

    /// Host command; rejected commands are logged and produce no actions
    pub fn handle_command(&self, channel: Channel, value: CommandValue) -> Vec<SessionAction> {
        match command::dispatch(&self.snapshot, channel, value) {
            Ok(actions) => actions,
            Err(rejected) => {
                warn!("Ignoring {value} for channel {channel}: {rejected}");
                vec![]
            }
        }
    }
}

fn hex(frame: &[u8]) -> String {
    data_encoding::HEXUPPER.encode(frame)
}
