//! Platform boundary.
//!
//! The device-enumeration subsystem and the GATT transport are consumed
//! through these traits. [`crate::ble::native`] implements them on top of
//! btleplug; tests drive the controller through a scripted fake.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::characteristics::ValueChangedEvent;
use crate::ble::record::{DeviceRecord, DeviceRecordUpdate};
use crate::error::Result;

/// Result of a single round-trip to the peripheral.
pub type GattResult<T> = std::result::Result<T, CommunicationStatus>;

/// Callback invoked with every value pushed by a notifying characteristic.
pub type ValueChangedHandler = Arc<dyn Fn(ValueChangedEvent) + Send + Sync>;

/// Sending half handed to a watcher; every registered handler posts here.
pub type WatcherSink = mpsc::UnboundedSender<WatcherEvent>;

/// Non-success status of a GATT round-trip.
///
/// The discriminants are the transport's numeric status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommunicationStatus {
    /// The peripheral could not be reached.
    Unreachable = 1,
    /// The peripheral answered with a protocol error.
    ProtocolError = 2,
    /// The peripheral refused access.
    AccessDenied = 3,
}

impl fmt::Display for CommunicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "Unreachable"),
            Self::ProtocolError => write!(f, "ProtocolError"),
            Self::AccessDenied => write!(f, "AccessDenied"),
        }
    }
}

/// Lifecycle status of a device watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WatcherStatus {
    /// Created but not started.
    #[default]
    Created,
    /// Enumerating.
    Started,
    /// Initial enumeration finished; live updates still flow.
    EnumerationCompleted,
    /// Stop requested, `Stopped` not yet delivered.
    Stopping,
    /// Stopped.
    Stopped,
    /// Stopped because of a platform failure.
    Aborted,
}

impl WatcherStatus {
    /// Whether the watcher is still delivering events.
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started | Self::EnumerationCompleted)
    }
}

/// Link state of a bound device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connected.
    Connected,
}

impl ConnectionStatus {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// State of the GATT session backing a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// No live session.
    #[default]
    Closed,
    /// Session open.
    Active,
}

/// Whether a GATT query may be answered from the platform cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheMode {
    /// Cached values are acceptable.
    Cached,
    /// Always re-fetch from the peripheral.
    Uncached,
}

/// Client characteristic configuration descriptor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientConfiguration {
    /// No server-initiated updates.
    #[default]
    None,
    /// Unacknowledged notifications.
    Notify,
    /// Acknowledged indications.
    Indicate,
}

/// Category of records a watcher enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceInformationKind {
    /// Peripherals discoverable through advertisement.
    #[default]
    AssociationEndpoint,
    /// Container grouping several association endpoints.
    AssociationEndpointContainer,
    /// Paired device objects.
    Device,
}

/// Parameters for creating a device watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatcherQuery {
    /// Filter expression selecting the protocol to enumerate.
    pub filter: String,
    /// Property names each record should carry.
    pub requested_properties: Vec<String>,
    /// Kind of record to enumerate.
    pub kind: DeviceInformationKind,
}

/// Event delivered by a running watcher.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// A device appeared.
    Added(DeviceRecord),
    /// Properties of a known device changed.
    Updated(DeviceRecordUpdate),
    /// A device disappeared.
    Removed(DeviceRecordUpdate),
    /// Initial enumeration is finished.
    EnumerationCompleted,
    /// The watcher stopped.
    Stopped,
}

impl WatcherEvent {
    /// Identifier the event refers to, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Added(record) => Some(&record.id),
            Self::Updated(update) | Self::Removed(update) => Some(&update.id),
            Self::EnumerationCompleted | Self::Stopped => None,
        }
    }
}

/// Token identifying a registered value-changed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(pub u64);

/// Entry point into the platform's Bluetooth stack.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Watcher type created by this platform.
    type Watcher: DeviceWatcher;
    /// Device handle type resolved by this platform.
    type Device: BleDevice;

    /// Create a watcher for the given query. The watcher is not started.
    fn create_watcher(&self, query: &WatcherQuery) -> Result<Self::Watcher>;

    /// Resolve a live device handle from an enumeration identifier.
    async fn device_from_id(&self, id: &str) -> Result<Self::Device>;
}

/// Device enumeration with added/updated/removed/stopped events.
#[async_trait]
pub trait DeviceWatcher: Send + Sync {
    /// Current status.
    fn status(&self) -> WatcherStatus;

    /// Register the event handlers. Must be called before [`start`](Self::start).
    fn attach(&self, sink: WatcherSink);

    /// Unregister the event handlers. No event is posted afterwards.
    fn detach(&self);

    /// Start enumerating.
    async fn start(&self) -> Result<()>;

    /// Request a stop. `Stopped` is posted once the watcher has stopped.
    async fn stop(&self) -> Result<()>;
}

/// Live handle to one peripheral.
#[async_trait]
pub trait BleDevice: Send + Sync {
    /// GATT service handle type.
    type Service: GattService;

    /// Enumeration identifier.
    fn id(&self) -> &str;

    /// Current link state.
    async fn connection_status(&self) -> ConnectionStatus;

    /// Primary services in enumeration order.
    async fn gatt_services(&self, mode: CacheMode) -> GattResult<Vec<Self::Service>>;

    /// Drop the link to the peripheral, if one is up.
    async fn disconnect(&self);

    /// Release the handle.
    async fn close(&self);
}

/// Handle to one GATT service.
#[async_trait]
pub trait GattService: Send + Sync {
    /// Characteristic handle type.
    type Characteristic: GattCharacteristic;

    /// Service UUID.
    fn uuid(&self) -> Uuid;

    /// Characteristics in enumeration order.
    async fn characteristics(&self, mode: CacheMode) -> GattResult<Vec<Self::Characteristic>>;

    /// State of the session backing this service.
    async fn session_status(&self) -> SessionStatus;

    /// Close the backing session.
    async fn close_session(&self);

    /// Release the service handle.
    async fn close(&self);
}

/// Handle to one GATT characteristic.
#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    /// Characteristic UUID.
    fn uuid(&self) -> Uuid;

    /// Capability flags.
    fn properties(&self) -> CharPropFlags;

    /// Write the client configuration descriptor and wait for the result.
    async fn write_client_configuration(&self, value: ClientConfiguration) -> GattResult<()>;

    /// Register a value-changed handler.
    fn add_value_changed(&self, handler: ValueChangedHandler) -> HandlerToken;

    /// Unregister a value-changed handler.
    fn remove_value_changed(&self, token: HandlerToken);

    /// Write a value and wait for the peripheral's acknowledgement.
    async fn write_with_result(&self, value: Bytes) -> GattResult<()>;
}

/// Service type of a device type.
pub type ServiceOf<D> = <D as BleDevice>::Service;

/// Characteristic type of a device type.
pub type CharacteristicOf<D> = <ServiceOf<D> as GattService>::Characteristic;
