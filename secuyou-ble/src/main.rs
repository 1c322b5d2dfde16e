//! Command line client for Secuyou smart locks
//!
//! Scans for locks, shows their status and sends lock, unlock and home
//! lock commands. Lock settings come from `$SECUYOU_HOME/lock.json`.

use clap::{Parser, Subcommand, ValueEnum};
use secuyou_ble_controller::ble;
use secuyou_node::{
    Availability, Channel, ChannelState, CommandValue, LockConfig, LockHandle, LockHandler,
    LockUpdate,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How long to wait for the handshake to finish
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for the lock to report a requested change
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "secuyou-ble")]
#[command(about = "Control Secuyou smart locks over BLE")]
struct Cli {
    /// Lock configuration file (default: $SECUYOU_HOME/lock.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Lock address or name, overrides the configuration
    #[arg(short, long, global = true)]
    address: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Secuyou locks
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Connect, print the lock status and exit
    Status,
    /// Stay connected and print every update
    Watch,
    /// Lock the door
    Lock,
    /// Unlock the door
    Unlock,
    /// Enable or disable home lock
    HomeLock {
        #[arg(value_enum)]
        state: Switch,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for CommandValue {
    fn from(switch: Switch) -> Self {
        match switch {
            Switch::On => CommandValue::On,
            Switch::Off => CommandValue::Off,
        }
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Scan { duration } => return scan_locks(duration).await,
        other => other,
    };

    let config = load_config(cli.config, cli.address)?;
    let mut lock = LockSession::open(config).await?;

    match command {
        Commands::Scan { .. } => {}
        Commands::Status => {
            lock.wait_ready().await?;
            lock.wait_for_channels(&Channel::ALL).await?;
            for channel in Channel::ALL {
                if let Some(state) = lock.channels.get(&channel) {
                    println!("  {channel}: {state}");
                }
            }
        }
        Commands::Watch => {
            tokio::select! {
                result = lock.watch() => result?,
                _ = tokio::signal::ctrl_c() => println!("Interrupted"),
            }
        }
        Commands::Lock => lock.set(Channel::Lock, CommandValue::On).await?,
        Commands::Unlock => lock.set(Channel::Lock, CommandValue::Off).await?,
        Commands::HomeLock { state } => lock.set(Channel::HomeLock, state.into()).await?,
    }

    lock.handle.shutdown()?;
    Ok(())
}

fn load_config(path: Option<PathBuf>, address: Option<String>) -> CliResult<LockConfig> {
    let explicit = path.is_some();
    let path = match path {
        Some(path) => path,
        None => LockConfig::default_path()?,
    };
    let mut config = if explicit || path.exists() {
        LockConfig::load(&path)?
    } else {
        println!("No configuration at {}, connecting read-only", path.display());
        LockConfig::default()
    };
    if let Some(address) = address {
        config.address = address;
    }
    Ok(config)
}

async fn scan_locks(duration: u64) -> CliResult<()> {
    println!("Scanning for Secuyou locks ({} seconds)...", duration);

    let devices = ble::scan(duration).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_secuyou { " [SECUYOU]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

/// Whether `set` can skip sending, only the lock channel is short-circuited
fn already_set(channel: Channel, current: Option<&ChannelState>, target: &ChannelState) -> bool {
    channel == Channel::Lock && current == Some(target)
}

/// A running handler plus what it has reported so far
struct LockSession {
    handle: LockHandle,
    updates: mpsc::UnboundedReceiver<LockUpdate>,
    channels: HashMap<Channel, ChannelState>,
    status: Option<Availability>,
}

impl LockSession {
    async fn open(config: LockConfig) -> CliResult<Self> {
        let adapter = ble::get_adapter().await?;

        println!("Scanning for lock...");
        let target = Some(config.address.as_str()).filter(|a| !a.is_empty());
        let lock = ble::find_lock(&adapter, target).await?;
        println!("Found lock {}", lock.address());

        let (tx, updates) = mpsc::unbounded_channel();
        let (handle, _task) = LockHandler::spawn(lock.clone(), tx, config);

        let events = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = ble::drive(adapter, lock, events).await {
                tracing::error!("BLE event pump stopped: {e}");
            }
        });

        Ok(Self {
            handle,
            updates,
            channels: HashMap::new(),
            status: None,
        })
    }

    async fn next(&mut self) -> CliResult<LockUpdate> {
        let update = self.updates.recv().await.ok_or("lock handler stopped")?;
        match &update {
            LockUpdate::Status(status) => {
                println!("Status: {status}");
                self.status = Some(status.clone());
            }
            LockUpdate::Channel(channel, state) => {
                self.channels.insert(*channel, state.clone());
            }
            LockUpdate::Properties(props) => {
                if let Some(name) = &props.name {
                    println!("Lock name: {name}");
                }
                if let Some(firmware) = &props.firmware_version {
                    println!("Firmware: {firmware}");
                }
            }
        }
        Ok(update)
    }

    async fn wait_ready(&mut self) -> CliResult<()> {
        tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match self.next().await? {
                    LockUpdate::Status(Availability::Online | Availability::ReadOnly) => {
                        return CliResult::Ok(());
                    }
                    LockUpdate::Status(Availability::Offline(reason)) => {
                        return Err(reason.to_string().into());
                    }
                    _ => {}
                }
            }
        })
        .await
        .map_err(|_| "timed out waiting for the lock")?
    }

    async fn wait_for_channels(&mut self, channels: &[Channel]) -> CliResult<()> {
        tokio::time::timeout(COMMAND_TIMEOUT, async {
            while !channels.iter().all(|c| self.channels.contains_key(c)) {
                self.next().await?;
            }
            CliResult::Ok(())
        })
        .await
        .map_err(|_| "timed out waiting for lock status")?
    }

    async fn set(&mut self, channel: Channel, value: CommandValue) -> CliResult<()> {
        self.wait_ready().await?;
        if self.status == Some(Availability::ReadOnly) {
            return Err("no valid pin code configured, the lock is read-only".into());
        }
        self.wait_for_channels(&[channel]).await?;

        let target = ChannelState::on_off(value == CommandValue::On);
        if already_set(channel, self.channels.get(&channel), &target) {
            println!("{channel} is already {target}");
            return Ok(());
        }

        println!("Sending {value} to {channel}...");
        self.handle.command(channel, value)?;

        tokio::time::timeout(COMMAND_TIMEOUT, async {
            while self.channels.get(&channel) != Some(&target) {
                self.next().await?;
            }
            CliResult::Ok(())
        })
        .await
        .map_err(|_| format!("lock did not report {channel} {target}"))??;

        println!("{channel} is now {target}");
        Ok(())
    }

    async fn watch(&mut self) -> CliResult<()> {
        loop {
            if let LockUpdate::Channel(channel, state) = self.next().await? {
                println!("  {channel}: {state}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_is_short_circuited() {
        let on = ChannelState::On;
        let off = ChannelState::Off;
        assert!(already_set(Channel::Lock, Some(&on), &on));
        assert!(!already_set(Channel::Lock, Some(&off), &on));
        assert!(!already_set(Channel::Lock, None, &on));

        // home lock commands always reach the lock
        assert!(!already_set(Channel::HomeLock, Some(&off), &off));
        assert!(!already_set(Channel::HomeLock, Some(&on), &on));
    }
}
