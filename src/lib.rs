// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # bluetooth-le-controller
//!
//! A client-side controller for one Bluetooth Low Energy GATT peripheral.
//!
//! The controller discovers a device by identifier, name or advertised
//! service, binds one GATT service on it, binds a write and a notify
//! characteristic from that service, writes payloads and tears the whole
//! session down again.
//!
//! ## Features
//!
//! - **Discovery**: Watch for BLE devices and stop at the first match
//! - **Selection**: Whole-string regular expressions over id, name or service GUID
//! - **Binding**: Pick the write and notify characteristics from one service
//! - **Notifications**: Deliver value-changed events to a caller-supplied closure
//! - **Error Codes**: Every failing call also records a stable numeric code
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bluetooth_le_controller::{BleController, NativePlatform, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let platform = NativePlatform::new().await?;
//!     let mut controller = BleController::new(platform);
//!
//!     controller.connect_by_name(r".*45MW\.TRG.*").await?;
//!     controller
//!         .select_service(r"\{..3e4567-e89.-12d3-a456-426652340000\}")
//!         .await?;
//!     controller
//!         .select_characteristics(|event| println!("{:?}", event.value))
//!         .await?;
//!
//!     controller.write_str("Ping;").await?;
//!     controller.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for records and configuration

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod pattern;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::ControllerConfig;
pub use controller::BleController;
pub use error::{Error, ErrorCode, Result};
pub use pattern::Pattern;

// Re-export commonly used types from submodules
pub use ble::characteristics::ValueChangedEvent;
pub use ble::native::NativePlatform;
pub use ble::platform::{CommunicationStatus, ConnectionStatus, WatcherStatus};
pub use ble::record::{DeviceRecord, PropertyValue};
pub use ble::scanner::DiscoveryState;
pub use ble::selection::SelectionMode;
