//! Lock configuration - stored as JSON in SECUYOU_HOME

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of digits in a lock PIN
pub const PIN_LEN: usize = 5;

/// Length of the AES key in bytes (32 hex characters)
pub const KEY_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pin code must be exactly {PIN_LEN} digits")]
    InvalidPin,
    #[error("encryption key must be exactly {} hex characters", KEY_LEN * 2)]
    InvalidKey,
    #[error("no home directory, set SECUYOU_HOME")]
    NoHome,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Get SECUYOU_HOME directory (`~/.secuyou` unless overridden)
pub fn secuyou_home() -> Result<PathBuf, ConfigError> {
    match std::env::var("SECUYOU_HOME") {
        Ok(home) => Ok(PathBuf::from(home)),
        Err(_) => dirs::home_dir()
            .map(|home| home.join(".secuyou"))
            .ok_or(ConfigError::NoHome),
    }
}

/// Per-lock configuration
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// BLE address (or platform identifier) of the lock
    pub address: String,
    /// 5 digit PIN set up in the vendor app
    pub pin_code: String,
    /// 128 bit key as 32 hex characters
    pub encryption_key: String,
    /// Status polling interval once authenticated, -1 disables
    pub keep_alive_seconds: i64,
    /// Double toggle the bolt when the lock reports an indeterminate position
    pub attempt_lock_rescue: bool,
    /// Report `LockingInProgress` as `Locked`
    pub treat_locking_in_progress_as_locked: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            pin_code: String::new(),
            encryption_key: String::new(),
            keep_alive_seconds: 600,
            attempt_lock_rescue: false,
            treat_locking_in_progress_as_locked: false,
        }
    }
}

impl fmt::Debug for LockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockConfig")
            .field("address", &self.address)
            .field("pin_code", &"<hidden>")
            .field("encryption_key", &"<hidden>")
            .field("keep_alive_seconds", &self.keep_alive_seconds)
            .field("attempt_lock_rescue", &self.attempt_lock_rescue)
            .field(
                "treat_locking_in_progress_as_locked",
                &self.treat_locking_in_progress_as_locked,
            )
            .finish()
    }
}

impl LockConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config location, `$SECUYOU_HOME/lock.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(secuyou_home()?.join("lock.json"))
    }

    /// Keepalive interval, `None` when polling is disabled
    pub fn keep_alive(&self) -> Option<Duration> {
        u64::try_from(self.keep_alive_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Validate PIN and key; an error means the lock is driven read-only
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let pin = parse_pin(&self.pin_code)?;
        let key = parse_key(&self.encryption_key)?;
        Ok(Credentials { pin, key })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            keep_alive: self.keep_alive(),
            treat_locking_in_progress_as_locked: self.treat_locking_in_progress_as_locked,
        }
    }
}

/// Validated PIN and key
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub pin: [u8; PIN_LEN],
    pub key: [u8; KEY_LEN],
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<hidden>)")
    }
}

/// Behavior switches the state machine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub keep_alive: Option<Duration>,
    pub treat_locking_in_progress_as_locked: bool,
}

fn parse_pin(pin: &str) -> Result<[u8; PIN_LEN], ConfigError> {
    let bytes: [u8; PIN_LEN] = pin
        .as_bytes()
        .try_into()
        .map_err(|_| ConfigError::InvalidPin)?;
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(ConfigError::InvalidPin);
    }
    Ok(bytes)
}

fn parse_key(key: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    if key.len() != KEY_LEN * 2 {
        return Err(ConfigError::InvalidKey);
    }
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(key.as_bytes())
        .map_err(|_| ConfigError::InvalidKey)?;
    bytes.try_into().map_err(|_| ConfigError::InvalidKey)
}
