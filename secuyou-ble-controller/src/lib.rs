//! Secuyou BLE Controller
//!
//! btleplug backed [`Transport`](secuyou_node::Transport) for Secuyou locks,
//! plus scanning and the event pump feeding a
//! [`LockHandler`](secuyou_node::LockHandler).
//!
//! # Example
//!
//! ```ignore
//! use secuyou_ble_controller::ble;
//! use secuyou_node::{LockConfig, LockHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for locks
//!     for device in ble::scan(5).await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     // Drive one lock until the handler stops
//!     let config = LockConfig::load(&LockConfig::default_path()?)?;
//!     let adapter = ble::get_adapter().await?;
//!     let lock = ble::find_lock(&adapter, Some(&config.address)).await?;
//!     let (tx, mut updates) = tokio::sync::mpsc::unbounded_channel();
//!     let (handle, _task) = LockHandler::spawn(lock.clone(), tx, config);
//!     tokio::spawn(ble::drive(adapter, lock, handle));
//!     while let Some(update) = updates.recv().await {
//!         println!("{update}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
mod error;

pub use ble::{BleLock, LockDevice};
pub use error::BleError;
