//! Connection lifecycle for one lock
//!
//! [`LockHandler`] is a single task that owns the [`Session`]. Transport
//! callbacks, host commands, keepalive ticks, the disconnect debounce and
//! the end of a rescue all arrive as events on one channel, so the session
//! is only ever touched by one event at a time.
//!
//! Timers and the rescue sequence run as their own tasks and only post
//! events back. Each of those events carries the connection generation it
//! was created for; anything from an earlier connection is dropped.
//!
//! ```text
//!  Connected ──> new Session, cancel keepalive + debounce
//!  ServicesDiscovered ──> check characteristics, notifications,
//!                         properties, read lock state, handshake
//!  Disconnected ──> cancel keepalive, offline after 3s unless reconnected
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use secuyou_proto::GattCharacteristic;
use secuyou_proto::ble::commands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelState, CommandValue};
use crate::config::LockConfig;
use crate::properties::DeviceProperties;
use crate::rescue::{RESCUE_STEP_DELAY, RESCUE_TIMEOUT, RescuePolicy};
use crate::session::{Session, SessionAction};
use crate::transport::{LockListener, Transport};
use crate::{Availability, LockUpdate, OfflineReason};

/// Delay before a dropped connection is reported offline
pub const DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Upper bound for reading the informational characteristics
pub const PROPERTIES_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a single GATT operation awaited by the handler
///
/// A response the lock never sends would otherwise hold up every queued
/// event, the disconnect debounce included.
pub const GATT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Events fed to the handler by the transport and the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Connected,
    ServicesDiscovered,
    Disconnected,
    Notification {
        characteristic: GattCharacteristic,
        value: Vec<u8>,
    },
    Command {
        channel: Channel,
        value: CommandValue,
    },
    Shutdown,
}

#[derive(Debug)]
enum Event {
    External(LockEvent),
    KeepAlive { generation: u64 },
    DebounceExpired { generation: u64 },
    RescueFinished {
        generation: u64,
        status: Option<Vec<u8>>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("lock handler has stopped")]
pub struct HandlerClosed;

/// Cloneable input side of a [`LockHandler`]
#[derive(Debug, Clone)]
pub struct LockHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl LockHandle {
    pub fn send(&self, event: LockEvent) -> Result<(), HandlerClosed> {
        self.tx.send(Event::External(event)).map_err(|_| HandlerClosed)
    }

    pub fn connected(&self) -> Result<(), HandlerClosed> {
        self.send(LockEvent::Connected)
    }

    pub fn services_discovered(&self) -> Result<(), HandlerClosed> {
        self.send(LockEvent::ServicesDiscovered)
    }

    pub fn disconnected(&self) -> Result<(), HandlerClosed> {
        self.send(LockEvent::Disconnected)
    }

    pub fn notification(
        &self,
        characteristic: GattCharacteristic,
        value: Vec<u8>,
    ) -> Result<(), HandlerClosed> {
        self.send(LockEvent::Notification {
            characteristic,
            value,
        })
    }

    pub fn command(&self, channel: Channel, value: CommandValue) -> Result<(), HandlerClosed> {
        self.send(LockEvent::Command { channel, value })
    }

    pub fn shutdown(&self) -> Result<(), HandlerClosed> {
        self.send(LockEvent::Shutdown)
    }
}

/// At most one keepalive and one debounce timer at a time
#[derive(Debug, Default)]
struct Timers {
    keep_alive: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel_keep_alive(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }

    fn cancel_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_keep_alive();
        self.cancel_debounce();
    }
}

#[derive(Debug, thiserror::Error)]
enum GattError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Transport(E),
    #[error("no response within {}s", GATT_OP_TIMEOUT.as_secs())]
    TimedOut,
}

async fn bounded<V, E>(op: impl Future<Output = Result<V, E>>) -> Result<V, GattError<E>>
where
    E: std::error::Error + 'static,
{
    match tokio::time::timeout(GATT_OP_TIMEOUT, op).await {
        Ok(result) => result.map_err(GattError::Transport),
        Err(_) => Err(GattError::TimedOut),
    }
}

#[derive(Debug, thiserror::Error)]
enum RescueError<E: std::error::Error + 'static> {
    #[error("device not connected")]
    NotConnected,
    #[error("confirm characteristic not found")]
    MissingCharacteristic,
    #[error("could not read lock status: {0}")]
    Read(#[source] E),
}

pub struct LockHandler<T: Transport, L: LockListener> {
    transport: T,
    listener: L,
    config: LockConfig,
    session: Session,
    rescue: RescuePolicy,
    timers: Timers,
    generation: u64,
    rx: mpsc::UnboundedReceiver<Event>,
    // weak so that the loop ends once every LockHandle is gone
    events: mpsc::WeakUnboundedSender<Event>,
}

impl<T: Transport, L: LockListener> LockHandler<T, L> {
    pub fn new(transport: T, listener: L, config: LockConfig) -> (Self, LockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!("Using configuration: {config:?}");
        let handler = Self {
            transport,
            listener,
            session: Session::from_config(&config),
            rescue: RescuePolicy::new(config.attempt_lock_rescue),
            config,
            timers: Timers::default(),
            generation: 0,
            rx,
            events: tx.downgrade(),
        };
        (handler, LockHandle { tx })
    }

    /// Spawn the handler on the current runtime
    pub fn spawn(transport: T, listener: L, config: LockConfig) -> (LockHandle, JoinHandle<()>) {
        let (handler, handle) = Self::new(transport, listener, config);
        (handle, tokio::spawn(handler.run()))
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::External(LockEvent::Shutdown) => break,
                Event::External(event) => self.handle_event(event).await,
                Event::KeepAlive { generation } if generation == self.generation => {
                    debug!("Keepalive refresh");
                    self.execute(vec![SessionAction::Refresh]).await;
                }
                Event::DebounceExpired { generation } if generation == self.generation => {
                    self.timers.debounce = None;
                    self.declare_offline();
                }
                Event::RescueFinished { generation, status } => {
                    self.finish_rescue(generation, status).await;
                }
                stale => debug!("Dropping stale {stale:?}"),
            }
        }
        self.timers.cancel_keep_alive();
        self.timers.cancel_debounce();
        debug!("Lock handler stopped");
    }

    async fn handle_event(&mut self, event: LockEvent) {
        match event {
            LockEvent::Connected => {
                info!(address = %self.config.address, "Connected");
                self.timers.cancel_debounce();
                self.timers.cancel_keep_alive();
                self.generation += 1;
                self.session = Session::from_config(&self.config);
            }
            LockEvent::ServicesDiscovered => self.initialize().await,
            LockEvent::Disconnected => {
                info!(address = %self.config.address, "Disconnected");
                self.timers.cancel_keep_alive();
                self.generation += 1;
                self.start_debounce();
            }
            LockEvent::Notification {
                characteristic,
                value,
            } => {
                let actions = self.feed(characteristic, &value);
                self.execute(actions).await;
            }
            LockEvent::Command { channel, value } => {
                let actions = self.session.handle_command(channel, value);
                self.execute(actions).await;
            }
            LockEvent::Shutdown => {}
        }
    }

    async fn initialize(&mut self) {
        info!("Starting lock handshake procedure");
        self.listener.update(LockUpdate::Status(Availability::Initializing(
            "Connected, initializing".to_string(),
        )));

        let missing: Vec<GattCharacteristic> = GattCharacteristic::REQUIRED
            .into_iter()
            .filter(|c| !self.transport.has_characteristic(*c))
            .collect();
        if !missing.is_empty() {
            warn!(
                address = %self.config.address,
                "Expected GATT characteristics missing: {missing:?}, cannot communicate with device"
            );
            self.listener.update(LockUpdate::Status(Availability::Offline(
                OfflineReason::UnsupportedDevice("characteristics missing".to_string()),
            )));
            if let Err(e) = bounded(self.transport.disconnect()).await {
                warn!("Disconnect failed: {e}");
            }
            return;
        }

        self.enable_notifications().await;
        self.read_properties().await;

        match bounded(self.transport.read(GattCharacteristic::LockState)).await {
            Ok(frame) => {
                let actions = self.session.handle_initial_state(&frame);
                self.execute(actions).await;
            }
            Err(e) => warn!("Could not read initial lock state: {e}"),
        }
    }

    async fn enable_notifications(&self) {
        for characteristic in [GattCharacteristic::LockState, GattCharacteristic::LockStatus] {
            if let Err(e) = bounded(self.transport.subscribe(characteristic)).await {
                warn!("Could not enable notifications on {characteristic:?}: {e}");
            }
        }
    }

    async fn read_properties(&self) {
        let read_all = async {
            let mut props = DeviceProperties::default();
            for characteristic in DeviceProperties::SOURCES {
                if !self.transport.has_characteristic(characteristic) {
                    continue;
                }
                match self.transport.read(characteristic).await {
                    Ok(data) => props.set(characteristic, &data),
                    Err(e) => debug!("Could not read {characteristic:?}: {e}"),
                }
            }
            props
        };
        match tokio::time::timeout(PROPERTIES_TIMEOUT, read_all).await {
            Ok(props) => {
                debug!("Updated device properties: {props:?}");
                self.listener.update(LockUpdate::Properties(props));
            }
            Err(_) => warn!("Timed out reading device properties"),
        }
    }

    fn feed(&mut self, characteristic: GattCharacteristic, value: &[u8]) -> Vec<SessionAction> {
        match characteristic {
            GattCharacteristic::LockState => self.session.handle_device_state(value),
            GattCharacteristic::LockStatus => {
                let now = tokio::time::Instant::now().into_std();
                self.session.handle_lock_status(value, &mut self.rescue, now)
            }
            other => {
                debug!("Ignoring update from {other:?}");
                vec![]
            }
        }
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Write {
                    characteristic,
                    payload,
                } => {
                    if let Err(e) = bounded(self.transport.write(characteristic, &payload)).await {
                        warn!("Write to {characteristic:?} failed: {e}");
                    }
                }
                SessionAction::Read(characteristic) => {
                    match bounded(self.transport.read(characteristic)).await {
                        Ok(value) => queue.extend(self.feed(characteristic, &value)),
                        Err(e) => warn!("Read of {characteristic:?} failed: {e}"),
                    }
                }
                SessionAction::Refresh => {
                    if !self.connected().await {
                        debug!("Not connected, skipping refresh");
                        continue;
                    }
                    self.enable_notifications().await;
                    match bounded(self.transport.read(GattCharacteristic::LockStatus)).await {
                        Ok(value) => {
                            queue.extend(self.feed(GattCharacteristic::LockStatus, &value))
                        }
                        Err(e) => warn!("Status refresh failed: {e}"),
                    }
                }
                SessionAction::StartKeepAlive(interval) => self.start_keep_alive(interval),
                SessionAction::StartRescue => self.start_rescue(),
                SessionAction::Status(status) => {
                    self.listener.update(LockUpdate::Status(status));
                }
                SessionAction::Channel(channel, state) => {
                    self.listener.update(LockUpdate::Channel(channel, state));
                }
            }
        }
    }

    async fn connected(&self) -> bool {
        tokio::time::timeout(GATT_OP_TIMEOUT, self.transport.is_connected())
            .await
            .unwrap_or(false)
    }

    fn declare_offline(&self) {
        self.listener.update(LockUpdate::Status(Availability::Offline(
            OfflineReason::Gone,
        )));
        for channel in Channel::ALL {
            self.listener
                .update(LockUpdate::Channel(channel, ChannelState::Undefined));
        }
    }

    fn start_keep_alive(&mut self, interval: Duration) {
        self.timers.cancel_keep_alive();
        let events = self.events.clone();
        let generation = self.generation;
        self.timers.keep_alive = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = events.upgrade() else { break };
                if tx.send(Event::KeepAlive { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn start_debounce(&mut self) {
        self.timers.cancel_debounce();
        let events = self.events.clone();
        let generation = self.generation;
        self.timers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(DISCONNECT_DEBOUNCE).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::DebounceExpired { generation });
            }
        }));
    }

    fn start_rescue(&self) {
        info!("Starting rescue operation");
        let transport = self.transport.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let status = match tokio::time::timeout(RESCUE_TIMEOUT, rescue_sequence(&transport))
                .await
            {
                Ok(Ok(frame)) => Some(frame),
                Ok(Err(e)) => {
                    warn!("Rescue operation aborted: {e}");
                    None
                }
                Err(_) => {
                    warn!("Rescue operation timed out after {RESCUE_TIMEOUT:?}");
                    None
                }
            };
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(Event::RescueFinished { generation, status });
            }
        });
    }

    async fn finish_rescue(&mut self, generation: u64, status: Option<Vec<u8>>) {
        match status {
            Some(frame) if generation == self.generation => {
                let now = tokio::time::Instant::now().into_std();
                let (actions, resolved) =
                    self.session.handle_rescue_status(&frame, &mut self.rescue, now);
                self.execute(actions).await;
                if resolved {
                    info!("Rescue operation successful");
                } else {
                    warn!("Rescue operation unsuccessful");
                }
            }
            Some(_) => debug!("Rescue finished on an earlier connection"),
            None => warn!("Rescue operation unsuccessful"),
        }
        // released even on timeout so later attempts are not blocked
        self.rescue.finish();
    }
}

async fn rescue_sequence<T: Transport>(transport: &T) -> Result<Vec<u8>, RescueError<T::Error>> {
    if !transport.is_connected().await {
        return Err(RescueError::NotConnected);
    }
    if !transport.has_characteristic(GattCharacteristic::Confirm) {
        return Err(RescueError::MissingCharacteristic);
    }

    for step in 1..=2 {
        if let Err(e) = transport
            .write(GattCharacteristic::Confirm, &[commands::TOGGLE_LOCK])
            .await
        {
            warn!("Toggle #{step} failed: {e}");
        } else {
            info!("Toggle #{step} sent");
        }
        tokio::time::sleep(RESCUE_STEP_DELAY).await;
    }

    let frame = transport
        .read(GattCharacteristic::LockStatus)
        .await
        .map_err(RescueError::Read)?;
    info!("Status update after rescue received");
    Ok(frame)
}
