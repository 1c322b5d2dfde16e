//! Host command dispatch
//!
//! Maps a (channel, command) pair to the frames written to the lock.
//! Refresh is always allowed; everything else needs an authenticated
//! session and passes the idempotence guards below.

use secuyou_proto::GattCharacteristic;
use secuyou_proto::LockingMechanismPosition;
use secuyou_proto::ble::commands;

use crate::channel::{Channel, CommandValue};
use crate::session::{AuthenticationState, LockSnapshot, SessionAction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    #[error("authentication state is {0:?}, not Authenticated")]
    NotAuthenticated(AuthenticationState),
    #[error("lock is LockingInProgress, result would be unpredictable")]
    OperationInProgress,
    #[error("lock already reports locked")]
    AlreadyLocked,
    #[error("lock already reports unlocked")]
    AlreadyUnlocked,
    #[error("home lock already reports enabled")]
    HomeLockAlreadyEnabled,
    #[error("unsupported command {value} for channel {channel}")]
    Unsupported {
        channel: Channel,
        value: CommandValue,
    },
}

pub fn dispatch(
    snapshot: &LockSnapshot,
    channel: Channel,
    value: CommandValue,
) -> Result<Vec<SessionAction>, CommandRejected> {
    if value == CommandValue::Refresh {
        return Ok(vec![SessionAction::Refresh]);
    }

    if snapshot.authentication_state != AuthenticationState::Authenticated {
        return Err(CommandRejected::NotAuthenticated(
            snapshot.authentication_state,
        ));
    }

    match channel {
        Channel::Lock => {
            match (snapshot.lock_position, value) {
                (LockingMechanismPosition::LockingInProgress, _) => {
                    return Err(CommandRejected::OperationInProgress);
                }
                (LockingMechanismPosition::Locked, CommandValue::On) => {
                    return Err(CommandRejected::AlreadyLocked);
                }
                (LockingMechanismPosition::Unlocked, CommandValue::Off) => {
                    return Err(CommandRejected::AlreadyUnlocked);
                }
                _ => {}
            }
            tracing::debug!("Toggling lock, current state is {:?}", snapshot.lock_position);
            Ok(vec![write(commands::TOGGLE_LOCK)])
        }
        Channel::HomeLock => {
            // no guard for off while already disabled
            if snapshot.home_lock_enabled && value == CommandValue::On {
                return Err(CommandRejected::HomeLockAlreadyEnabled);
            }
            tracing::debug!(
                "Toggling home lock setting, current state is {}",
                snapshot.home_lock_enabled
            );
            Ok(vec![write(commands::TOGGLE_HOME_LOCK)])
        }
        Channel::Battery | Channel::HandlePosition => {
            Err(CommandRejected::Unsupported { channel, value })
        }
    }
}

fn write(command: u8) -> SessionAction {
    SessionAction::Write {
        characteristic: GattCharacteristic::Confirm,
        payload: vec![command],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated(position: LockingMechanismPosition) -> LockSnapshot {
        LockSnapshot {
            authentication_state: AuthenticationState::Authenticated,
            lock_position: position,
            ..Default::default()
        }
    }

    fn toggle_lock() -> Vec<SessionAction> {
        vec![write(0x01)]
    }

    #[test]
    fn refresh_always_allowed() {
        let snapshot = LockSnapshot::default();
        for channel in Channel::ALL {
            assert_eq!(
                dispatch(&snapshot, channel, CommandValue::Refresh),
                Ok(vec![SessionAction::Refresh])
            );
        }
    }

    #[test]
    fn requires_authentication() {
        for state in [
            AuthenticationState::Unauthenticated,
            AuthenticationState::AuthenticationInProgress,
        ] {
            let snapshot = LockSnapshot {
                authentication_state: state,
                ..Default::default()
            };
            assert_eq!(
                dispatch(&snapshot, Channel::Lock, CommandValue::On),
                Err(CommandRejected::NotAuthenticated(state))
            );
            assert_eq!(
                dispatch(&snapshot, Channel::HomeLock, CommandValue::On),
                Err(CommandRejected::NotAuthenticated(state))
            );
        }
    }

    #[test]
    fn lock_toggle_guards() {
        use LockingMechanismPosition::{Locked, Unlocked};

        assert_eq!(
            dispatch(&authenticated(Locked), Channel::Lock, CommandValue::On),
            Err(CommandRejected::AlreadyLocked)
        );
        assert_eq!(
            dispatch(&authenticated(Locked), Channel::Lock, CommandValue::Off),
            Ok(toggle_lock())
        );
        assert_eq!(
            dispatch(&authenticated(Unlocked), Channel::Lock, CommandValue::On),
            Ok(toggle_lock())
        );
        assert_eq!(
            dispatch(&authenticated(Unlocked), Channel::Lock, CommandValue::Off),
            Err(CommandRejected::AlreadyUnlocked)
        );
    }

    #[test]
    fn lock_toggle_while_moving_or_unknown() {
        for value in [CommandValue::On, CommandValue::Off] {
            assert_eq!(
                dispatch(
                    &authenticated(LockingMechanismPosition::LockingInProgress),
                    Channel::Lock,
                    value
                ),
                Err(CommandRejected::OperationInProgress)
            );
            assert_eq!(
                dispatch(
                    &authenticated(LockingMechanismPosition::Unknown),
                    Channel::Lock,
                    value
                ),
                Ok(toggle_lock())
            );
        }
    }

    #[test]
    fn home_lock_guard_is_one_sided() {
        let mut snapshot = authenticated(LockingMechanismPosition::Locked);
        snapshot.home_lock_enabled = true;
        assert_eq!(
            dispatch(&snapshot, Channel::HomeLock, CommandValue::On),
            Err(CommandRejected::HomeLockAlreadyEnabled)
        );
        assert_eq!(
            dispatch(&snapshot, Channel::HomeLock, CommandValue::Off),
            Ok(vec![write(0xFF)])
        );

        snapshot.home_lock_enabled = false;
        assert_eq!(
            dispatch(&snapshot, Channel::HomeLock, CommandValue::On),
            Ok(vec![write(0xFF)])
        );
        assert_eq!(
            dispatch(&snapshot, Channel::HomeLock, CommandValue::Off),
            Ok(vec![write(0xFF)])
        );
    }

    #[test]
    fn read_only_channels() {
        let snapshot = authenticated(LockingMechanismPosition::Locked);
        assert!(matches!(
            dispatch(&snapshot, Channel::Battery, CommandValue::On),
            Err(CommandRejected::Unsupported { .. })
        ));
        assert!(matches!(
            dispatch(&snapshot, Channel::HandlePosition, CommandValue::Off),
            Err(CommandRejected::Unsupported { .. })
        ));
    }
}
