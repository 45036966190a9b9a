//! btleplug implementation of the platform traits.
//!
//! The watcher is a BLE scan on the first adapter: peripherals the adapter
//! already knows are reported first, followed by `EnumerationCompleted`
//! and then live discovery/update events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::ValueChangedEvent;
use crate::ble::constants::{DEVICE_ADDRESS, IS_CONNECTABLE, IS_CONNECTED};
use crate::ble::platform::{
    BleDevice, BlePlatform, CacheMode, ClientConfiguration, CommunicationStatus, ConnectionStatus,
    DeviceWatcher, GattCharacteristic, GattResult, GattService, HandlerToken, SessionStatus,
    ValueChangedHandler, WatcherEvent, WatcherQuery, WatcherSink, WatcherStatus,
};
use crate::ble::record::{DeviceRecord, DeviceRecordUpdate};
use crate::error::{Error, Result};

/// Map a btleplug failure onto the transport status taxonomy.
pub fn communication_status(error: &btleplug::Error) -> CommunicationStatus {
    match error {
        btleplug::Error::NotConnected
        | btleplug::Error::DeviceNotFound
        | btleplug::Error::TimedOut(_) => CommunicationStatus::Unreachable,
        btleplug::Error::PermissionDenied => CommunicationStatus::AccessDenied,
        _ => CommunicationStatus::ProtocolError,
    }
}

fn to_status(error: btleplug::Error) -> CommunicationStatus {
    let status = communication_status(&error);
    debug!("GATT operation failed ({}): {}", status, error);
    status
}

/// Platform backed by a btleplug adapter.
pub struct NativePlatform {
    adapter: Adapter,
}

impl NativePlatform {
    /// Use the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl BlePlatform for NativePlatform {
    type Watcher = NativeWatcher;
    type Device = NativeDevice;

    fn create_watcher(&self, query: &WatcherQuery) -> Result<NativeWatcher> {
        debug!(
            "Creating watcher: {} ({:?}, {} properties)",
            query.filter,
            query.kind,
            query.requested_properties.len()
        );
        Ok(NativeWatcher {
            adapter: self.adapter.clone(),
            status: Arc::new(RwLock::new(WatcherStatus::Created)),
            sink: Arc::new(Mutex::new(None)),
            named: Arc::new(Mutex::new(HashSet::new())),
            scan_handle: Mutex::new(None),
        })
    }

    async fn device_from_id(&self, id: &str) -> Result<NativeDevice> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;
        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or(Error::DeviceNotFound)?;

        Ok(NativeDevice {
            id: id.to_string(),
            peripheral,
        })
    }
}

/// Scan-based device watcher.
pub struct NativeWatcher {
    adapter: Adapter,
    status: Arc<RwLock<WatcherStatus>>,
    sink: Arc<Mutex<Option<WatcherSink>>>,
    /// Peripherals already reported through `Added` with a name.
    named: Arc<Mutex<HashSet<String>>>,
    scan_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NativeWatcher {
    fn post(sink: &Mutex<Option<WatcherSink>>, event: WatcherEvent) {
        let sink = sink.lock().clone();
        if let Some(sink) = sink {
            let _ = sink.send(event);
        }
    }

    async fn record(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceRecord> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };
        Self::record_for(&peripheral).await
    }

    async fn record_for(peripheral: &Peripheral) -> Option<DeviceRecord> {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };
        let connected = peripheral.is_connected().await.unwrap_or(false);

        Some(
            DeviceRecord::new(
                peripheral.id().to_string(),
                properties.local_name.unwrap_or_default(),
            )
            .with_property(DEVICE_ADDRESS, properties.address.to_string())
            .with_property(IS_CONNECTED, connected)
            // btleplug has no connectable flag, so every peripheral passes this filter
            .with_property(IS_CONNECTABLE, true),
        )
    }

    fn announce(sink: &Mutex<Option<WatcherSink>>, named: &Mutex<HashSet<String>>, record: DeviceRecord) {
        if !record.name.is_empty() {
            named.lock().insert(record.id.clone());
        }
        Self::post(sink, WatcherEvent::Added(record));
    }

    async fn handle_event(
        adapter: &Adapter,
        sink: &Mutex<Option<WatcherSink>>,
        named: &Mutex<HashSet<String>>,
        event: CentralEvent,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                if let Some(record) = Self::record(adapter, &id).await {
                    Self::announce(sink, named, record);
                }
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                if let Some(record) = Self::record(adapter, &id).await {
                    // Names often arrive after discovery; report the first named sighting as Added
                    if !record.name.is_empty() && !named.lock().contains(&record.id) {
                        Self::announce(sink, named, record);
                        return;
                    }
                    let mut update = DeviceRecordUpdate::new(record.id);
                    if !record.name.is_empty() {
                        update.name = Some(record.name);
                    }
                    update.properties = record.properties;
                    Self::post(sink, WatcherEvent::Updated(update));
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                let update = DeviceRecordUpdate::new(id.to_string()).with_property(IS_CONNECTED, true);
                Self::post(sink, WatcherEvent::Updated(update));
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let update = DeviceRecordUpdate::new(id.to_string()).with_property(IS_CONNECTED, false);
                Self::post(sink, WatcherEvent::Updated(update));
            }
            _ => {}
        }
    }
}

#[async_trait]
impl DeviceWatcher for NativeWatcher {
    fn status(&self) -> WatcherStatus {
        *self.status.read()
    }

    fn attach(&self, sink: WatcherSink) {
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        self.sink.lock().take();
    }

    async fn start(&self) -> Result<()> {
        if self.status().is_started() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan");

        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;
        *self.status.write() = WatcherStatus::Started;

        let known = self.adapter.peripherals().await.unwrap_or_default();
        for peripheral in &known {
            if let Some(record) = Self::record_for(peripheral).await {
                Self::announce(&self.sink, &self.named, record);
            }
        }
        *self.status.write() = WatcherStatus::EnumerationCompleted;
        Self::post(&self.sink, WatcherEvent::EnumerationCompleted);

        let adapter = self.adapter.clone();
        let status = self.status.clone();
        let sink = self.sink.clone();
        let named = self.named.clone();

        let handle = tokio::spawn(async move {
            while status.read().is_started() {
                match events.next().await {
                    Some(event) => Self::handle_event(&adapter, &sink, &named, event).await,
                    None => {
                        error!("Adapter event stream ended");
                        *status.write() = WatcherStatus::Aborted;
                        Self::post(&sink, WatcherEvent::Stopped);
                        break;
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.lock() = Some(handle);

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status().is_started() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");
        *self.status.write() = WatcherStatus::Stopping;

        if let Some(handle) = self.scan_handle.lock().take() {
            handle.abort();
        }
        let result = self.adapter.stop_scan().await;

        *self.status.write() = WatcherStatus::Stopped;
        Self::post(&self.sink, WatcherEvent::Stopped);

        result.map_err(Error::Bluetooth)
    }
}

impl Drop for NativeWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.scan_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Peripheral resolved from an enumeration identifier.
pub struct NativeDevice {
    id: String,
    peripheral: Peripheral,
}

impl NativeDevice {
    /// The underlying peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    async fn ensure_link(&self) -> GattResult<()> {
        if !self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Connecting to {}", self.id);
            self.peripheral.connect().await.map_err(to_status)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BleDevice for NativeDevice {
    type Service = NativeService;

    fn id(&self) -> &str {
        &self.id
    }

    async fn connection_status(&self) -> ConnectionStatus {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn gatt_services(&self, mode: CacheMode) -> GattResult<Vec<NativeService>> {
        self.ensure_link().await?;
        if mode == CacheMode::Uncached || self.peripheral.services().is_empty() {
            self.peripheral.discover_services().await.map_err(to_status)?;
        }

        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| NativeService {
                peripheral: self.peripheral.clone(),
                service,
            })
            .collect())
    }

    async fn disconnect(&self) {
        if !self.peripheral.is_connected().await.unwrap_or(false) {
            return;
        }
        match self.peripheral.disconnect().await {
            Ok(_) => info!("Disconnected from {}", self.id),
            Err(e) => warn!("Failed to disconnect from {}: {}", self.id, e),
        }
    }

    async fn close(&self) {
        debug!("Releasing device handle {}", self.id);
    }
}

/// GATT service on a btleplug peripheral.
pub struct NativeService {
    peripheral: Peripheral,
    service: Service,
}

#[async_trait]
impl GattService for NativeService {
    type Characteristic = NativeCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn characteristics(&self, mode: CacheMode) -> GattResult<Vec<NativeCharacteristic>> {
        let characteristics = if mode == CacheMode::Uncached {
            self.peripheral.discover_services().await.map_err(to_status)?;
            self.peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == self.service.uuid)
                .map(|s| s.characteristics)
                .unwrap_or_default()
        } else {
            self.service.characteristics.clone()
        };

        Ok(characteristics
            .into_iter()
            .map(|characteristic| NativeCharacteristic::new(self.peripheral.clone(), characteristic))
            .collect())
    }

    async fn session_status(&self) -> SessionStatus {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            SessionStatus::Active
        } else {
            SessionStatus::Closed
        }
    }

    async fn close_session(&self) {
        match self.peripheral.disconnect().await {
            Ok(_) => info!("Successfully disconnected from peripheral"),
            Err(e) => warn!("Failed to disconnect: {}", e),
        }
    }

    async fn close(&self) {
        debug!("Releasing service handle {}", self.service.uuid);
    }
}

type HandlerMap = Arc<Mutex<HashMap<u64, ValueChangedHandler>>>;

/// GATT characteristic on a btleplug peripheral.
pub struct NativeCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
    handlers: HandlerMap,
    next_token: AtomicU64,
    listener_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NativeCharacteristic {
    fn new(peripheral: Peripheral, characteristic: Characteristic) -> Self {
        Self {
            peripheral,
            characteristic,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            listener_handle: Mutex::new(None),
        }
    }

    fn start_listener(&self) {
        let mut slot = self.listener_handle.lock();
        if slot.is_some() {
            return;
        }

        let peripheral = self.peripheral.clone();
        let uuid = self.characteristic.uuid;
        let handlers = self.handlers.clone();

        *slot = Some(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!(
                    "Notification received from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );

                let event = ValueChangedEvent {
                    characteristic_uuid: notification.uuid,
                    value: Bytes::from(notification.value),
                };
                let current: Vec<_> = handlers.lock().values().cloned().collect();
                for handler in current {
                    handler(event.clone());
                }
            }

            debug!("Notification listener stopped");
        }));
    }

    fn stop_listener(&self) {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl GattCharacteristic for NativeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    fn properties(&self) -> CharPropFlags {
        self.characteristic.properties
    }

    async fn write_client_configuration(&self, value: ClientConfiguration) -> GattResult<()> {
        match value {
            ClientConfiguration::Notify | ClientConfiguration::Indicate => self
                .peripheral
                .subscribe(&self.characteristic)
                .await
                .map_err(to_status),
            ClientConfiguration::None => self
                .peripheral
                .unsubscribe(&self.characteristic)
                .await
                .map_err(to_status),
        }
    }

    fn add_value_changed(&self, handler: ValueChangedHandler) -> HandlerToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().insert(token, handler);
        self.start_listener();
        HandlerToken(token)
    }

    fn remove_value_changed(&self, token: HandlerToken) {
        let empty = {
            let mut handlers = self.handlers.lock();
            handlers.remove(&token.0);
            handlers.is_empty()
        };
        if empty {
            self.stop_listener();
        }
    }

    async fn write_with_result(&self, value: Bytes) -> GattResult<()> {
        self.peripheral
            .write(&self.characteristic, &value, WriteType::WithResponse)
            .await
            .map_err(to_status)
    }
}

impl Drop for NativeCharacteristic {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
