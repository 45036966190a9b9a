//! BLE communication module.
//!
//! The platform boundary lives in [`platform`]; [`native`] implements it on
//! top of btleplug. Discovery, selection, characteristic binding and
//! teardown are written against the traits only.

pub mod characteristics;
pub mod connection;
pub mod constants;
pub mod native;
pub mod platform;
pub mod record;
pub mod scanner;
pub mod selection;

pub use characteristics::{NotifySubscription, ValueChangedEvent};
pub use connection::Session;
pub use native::NativePlatform;
pub use platform::{
    BleDevice, BlePlatform, CacheMode, ClientConfiguration, CommunicationStatus, ConnectionStatus,
    DeviceWatcher, GattCharacteristic, GattService, SessionStatus, WatcherEvent, WatcherQuery,
    WatcherStatus,
};
pub use record::{DeviceRecord, DeviceRecordUpdate, PropertyValue};
pub use scanner::{DiscoveryController, DiscoveryOutcome, DiscoveryState};
pub use selection::{Selection, SelectionMode};
