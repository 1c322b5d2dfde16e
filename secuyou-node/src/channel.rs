//! Channels exposed to the host and the commands they accept

use std::fmt;
use std::str::FromStr;

use secuyou_proto::ble::channels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// on = locked, off = unlocked
    Lock,
    HomeLock,
    Battery,
    HandlePosition,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Lock,
        Channel::HomeLock,
        Channel::Battery,
        Channel::HandlePosition,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Channel::Lock => channels::LOCK,
            Channel::HomeLock => channels::HOME_LOCK,
            Channel::Battery => channels::BATTERY,
            Channel::HandlePosition => channels::HANDLE_POSITION,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.id() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Value published on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    On,
    Off,
    Open,
    Closed,
    Text(String),
    Undefined,
}

impl ChannelState {
    pub fn on_off(on: bool) -> Self {
        if on { ChannelState::On } else { ChannelState::Off }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::On => f.write_str("ON"),
            ChannelState::Off => f.write_str("OFF"),
            ChannelState::Open => f.write_str("OPEN"),
            ChannelState::Closed => f.write_str("CLOSED"),
            ChannelState::Text(text) => f.write_str(text),
            ChannelState::Undefined => f.write_str("UNDEF"),
        }
    }
}

/// Command sent by the host to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandValue {
    Refresh,
    On,
    Off,
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandValue::Refresh => f.write_str("REFRESH"),
            CommandValue::On => f.write_str("ON"),
            CommandValue::Off => f.write_str("OFF"),
        }
    }
}
