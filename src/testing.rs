//! Scripted in-memory platform used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ble::characteristics::ValueChangedEvent;
use crate::ble::constants::IS_CONNECTABLE;
use crate::ble::platform::{
    BleDevice, BlePlatform, CacheMode, ClientConfiguration, CommunicationStatus, ConnectionStatus,
    DeviceWatcher, GattCharacteristic, GattResult, GattService, HandlerToken, SessionStatus,
    ValueChangedHandler, WatcherEvent, WatcherQuery, WatcherSink, WatcherStatus,
};
use crate::ble::record::DeviceRecord;
use crate::error::{Error, Result};

/// A named, connectable record.
pub(crate) fn connectable(id: &str, name: &str) -> DeviceRecord {
    DeviceRecord::new(id, name).with_property(IS_CONNECTABLE, true)
}

/// Ordered log of release calls shared by a device and everything below it.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Default)]
struct PlatformInner {
    devices: Mutex<HashMap<String, FakeDevice>>,
    script: Mutex<Vec<WatcherEvent>>,
    status_after_start: Mutex<Option<WatcherStatus>>,
    fail_start: AtomicBool,
    resolves: AtomicUsize,
    watchers: Mutex<Vec<FakeWatcher>>,
}

/// Platform whose watchers replay a fixed script of events.
#[derive(Clone, Default)]
pub(crate) struct FakePlatform {
    inner: Arc<PlatformInner>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_device(&self, device: FakeDevice) {
        self.inner
            .devices
            .lock()
            .insert(device.inner.id.clone(), device);
    }

    pub(crate) fn device(&self, id: &str) -> FakeDevice {
        self.inner.devices.lock()[id].clone()
    }

    /// Events every new watcher posts when started.
    pub(crate) fn script(&self, events: Vec<WatcherEvent>) {
        *self.inner.script.lock() = events;
    }

    /// Status new watchers switch to right after posting their script.
    pub(crate) fn set_status_after_start(&self, status: WatcherStatus) {
        *self.inner.status_after_start.lock() = Some(status);
    }

    pub(crate) fn fail_start(&self) {
        self.inner.fail_start.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resolve_count(&self) -> usize {
        self.inner.resolves.load(Ordering::SeqCst)
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    pub(crate) fn last_watcher(&self) -> FakeWatcher {
        self.inner
            .watchers
            .lock()
            .last()
            .cloned()
            .expect("no watcher created")
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    type Watcher = FakeWatcher;
    type Device = FakeDevice;

    fn create_watcher(&self, _query: &WatcherQuery) -> Result<FakeWatcher> {
        let watcher = FakeWatcher {
            inner: Arc::new(WatcherInner {
                status: Mutex::new(WatcherStatus::Created),
                sink: Mutex::new(None),
                script: self.inner.script.lock().clone(),
                status_after_start: *self.inner.status_after_start.lock(),
                fail_start: self.inner.fail_start.load(Ordering::SeqCst),
                stops: AtomicUsize::new(0),
                detached: AtomicBool::new(false),
            }),
        };
        self.inner.watchers.lock().push(watcher.clone());
        Ok(watcher)
    }

    async fn device_from_id(&self, id: &str) -> Result<FakeDevice> {
        self.inner.resolves.fetch_add(1, Ordering::SeqCst);
        self.inner
            .devices
            .lock()
            .get(id)
            .cloned()
            .ok_or(Error::DeviceNotFound)
    }
}

struct WatcherInner {
    status: Mutex<WatcherStatus>,
    sink: Mutex<Option<WatcherSink>>,
    script: Vec<WatcherEvent>,
    status_after_start: Option<WatcherStatus>,
    fail_start: bool,
    stops: AtomicUsize,
    detached: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct FakeWatcher {
    inner: Arc<WatcherInner>,
}

impl FakeWatcher {
    pub(crate) fn stop_count(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    fn post(&self, event: WatcherEvent) {
        let sink = self.inner.sink.lock().clone();
        if let Some(sink) = sink {
            let _ = sink.send(event);
        }
    }
}

#[async_trait]
impl DeviceWatcher for FakeWatcher {
    fn status(&self) -> WatcherStatus {
        *self.inner.status.lock()
    }

    fn attach(&self, sink: WatcherSink) {
        *self.inner.sink.lock() = Some(sink);
        self.inner.detached.store(false, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.inner.sink.lock().take();
        self.inner.detached.store(true, Ordering::SeqCst);
    }

    async fn start(&self) -> Result<()> {
        if self.inner.fail_start {
            return Err(Error::Internal("watcher failed to start".to_string()));
        }
        *self.inner.status.lock() = WatcherStatus::Started;
        for event in &self.inner.script {
            self.post(event.clone());
        }
        if let Some(status) = self.inner.status_after_start {
            *self.inner.status.lock() = status;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        *self.inner.status.lock() = WatcherStatus::Stopped;
        self.post(WatcherEvent::Stopped);
        Ok(())
    }
}

struct DeviceInner {
    id: String,
    services: Mutex<Vec<FakeService>>,
    services_failure: Mutex<Option<CommunicationStatus>>,
    connection: Mutex<ConnectionStatus>,
    closed: AtomicBool,
    last_cache_mode: Mutex<Option<CacheMode>>,
    log: CallLog,
}

/// Connected device exposing a fixed list of services.
#[derive(Clone)]
pub(crate) struct FakeDevice {
    inner: Arc<DeviceInner>,
}

impl FakeDevice {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id: id.to_string(),
                services: Mutex::new(Vec::new()),
                services_failure: Mutex::new(None),
                connection: Mutex::new(ConnectionStatus::Connected),
                closed: AtomicBool::new(false),
                last_cache_mode: Mutex::new(None),
                log: CallLog::default(),
            }),
        }
    }

    pub(crate) fn with_service(self, service: FakeService) -> Self {
        service.adopt_log(&self.inner.log);
        self.inner.services.lock().push(service);
        self
    }

    pub(crate) fn failing_services(self, status: CommunicationStatus) -> Self {
        *self.inner.services_failure.lock() = Some(status);
        self
    }

    pub(crate) fn set_connection(&self, status: ConnectionStatus) {
        *self.inner.connection.lock() = status;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn connection(&self) -> ConnectionStatus {
        *self.inner.connection.lock()
    }

    pub(crate) fn last_cache_mode(&self) -> Option<CacheMode> {
        *self.inner.last_cache_mode.lock()
    }

    pub(crate) fn log(&self) -> CallLog {
        self.inner.log.clone()
    }
}

#[async_trait]
impl BleDevice for FakeDevice {
    type Service = FakeService;

    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn connection_status(&self) -> ConnectionStatus {
        *self.inner.connection.lock()
    }

    async fn gatt_services(&self, mode: CacheMode) -> GattResult<Vec<FakeService>> {
        *self.inner.last_cache_mode.lock() = Some(mode);
        if let Some(status) = *self.inner.services_failure.lock() {
            return Err(status);
        }
        Ok(self.inner.services.lock().clone())
    }

    async fn disconnect(&self) {
        *self.inner.connection.lock() = ConnectionStatus::Disconnected;
        self.inner.log.push("device.disconnect");
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.log.push("device.close");
    }
}

struct ServiceInner {
    uuid: Uuid,
    characteristics: Mutex<Vec<FakeCharacteristic>>,
    characteristics_failure: Mutex<Option<CommunicationStatus>>,
    session: Mutex<SessionStatus>,
    closed: AtomicBool,
    last_cache_mode: Mutex<Option<CacheMode>>,
    log: Mutex<CallLog>,
}

/// Service with an active session and a fixed list of characteristics.
#[derive(Clone)]
pub(crate) struct FakeService {
    inner: Arc<ServiceInner>,
}

impl FakeService {
    pub(crate) fn new(uuid: Uuid) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                uuid,
                characteristics: Mutex::new(Vec::new()),
                characteristics_failure: Mutex::new(None),
                session: Mutex::new(SessionStatus::Active),
                closed: AtomicBool::new(false),
                last_cache_mode: Mutex::new(None),
                log: Mutex::new(CallLog::default()),
            }),
        }
    }

    pub(crate) fn with_characteristic(self, characteristic: FakeCharacteristic) -> Self {
        characteristic.adopt_log(&self.inner.log.lock());
        self.inner.characteristics.lock().push(characteristic);
        self
    }

    pub(crate) fn failing_characteristics(self, status: CommunicationStatus) -> Self {
        *self.inner.characteristics_failure.lock() = Some(status);
        self
    }

    pub(crate) fn set_session(&self, status: SessionStatus) {
        *self.inner.session.lock() = status;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn last_cache_mode(&self) -> Option<CacheMode> {
        *self.inner.last_cache_mode.lock()
    }

    fn adopt_log(&self, log: &CallLog) {
        *self.inner.log.lock() = log.clone();
        for characteristic in self.inner.characteristics.lock().iter() {
            characteristic.adopt_log(log);
        }
    }

    fn log(&self) -> CallLog {
        self.inner.log.lock().clone()
    }
}

#[async_trait]
impl GattService for FakeService {
    type Characteristic = FakeCharacteristic;

    fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    async fn characteristics(&self, mode: CacheMode) -> GattResult<Vec<FakeCharacteristic>> {
        *self.inner.last_cache_mode.lock() = Some(mode);
        if let Some(status) = *self.inner.characteristics_failure.lock() {
            return Err(status);
        }
        Ok(self.inner.characteristics.lock().clone())
    }

    async fn session_status(&self) -> SessionStatus {
        *self.inner.session.lock()
    }

    async fn close_session(&self) {
        *self.inner.session.lock() = SessionStatus::Closed;
        self.log().push("service.close_session");
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.log().push("service.close");
    }
}

struct CharacteristicInner {
    uuid: Uuid,
    properties: CharPropFlags,
    configuration: Mutex<ClientConfiguration>,
    configuration_failure: Mutex<Option<CommunicationStatus>>,
    write_failure: Mutex<Option<CommunicationStatus>>,
    handlers: Mutex<HashMap<u64, ValueChangedHandler>>,
    next_token: AtomicU64,
    writes: Mutex<Vec<Bytes>>,
    log: Mutex<CallLog>,
}

/// Characteristic recording descriptor state, handlers and writes.
#[derive(Clone)]
pub(crate) struct FakeCharacteristic {
    inner: Arc<CharacteristicInner>,
}

impl FakeCharacteristic {
    pub(crate) fn new(uuid: u128, properties: CharPropFlags) -> Self {
        Self {
            inner: Arc::new(CharacteristicInner {
                uuid: Uuid::from_u128(uuid),
                properties,
                configuration: Mutex::new(ClientConfiguration::None),
                configuration_failure: Mutex::new(None),
                write_failure: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
                writes: Mutex::new(Vec::new()),
                log: Mutex::new(CallLog::default()),
            }),
        }
    }

    pub(crate) fn failing_configuration(self, status: CommunicationStatus) -> Self {
        self.fail_configuration_with(Some(status));
        self
    }

    pub(crate) fn fail_configuration_with(&self, status: Option<CommunicationStatus>) {
        *self.inner.configuration_failure.lock() = status;
    }

    pub(crate) fn failing_writes(self, status: CommunicationStatus) -> Self {
        *self.inner.write_failure.lock() = Some(status);
        self
    }

    pub(crate) fn configuration(&self) -> ClientConfiguration {
        *self.inner.configuration.lock()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    pub(crate) fn writes(&self) -> Vec<Bytes> {
        self.inner.writes.lock().clone()
    }

    /// Push a value to every registered handler.
    pub(crate) fn notify(&self, value: Bytes) {
        let handlers: Vec<_> = self.inner.handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(ValueChangedEvent {
                characteristic_uuid: self.inner.uuid,
                value: value.clone(),
            });
        }
    }

    fn adopt_log(&self, log: &CallLog) {
        *self.inner.log.lock() = log.clone();
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    fn properties(&self) -> CharPropFlags {
        self.inner.properties
    }

    async fn write_client_configuration(&self, value: ClientConfiguration) -> GattResult<()> {
        self.inner
            .log
            .lock()
            .push(format!("characteristic.configure {:?}", value));
        if let Some(status) = *self.inner.configuration_failure.lock() {
            return Err(status);
        }
        *self.inner.configuration.lock() = value;
        Ok(())
    }

    fn add_value_changed(&self, handler: ValueChangedHandler) -> HandlerToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        self.inner.handlers.lock().insert(token, handler);
        HandlerToken(token)
    }

    fn remove_value_changed(&self, token: HandlerToken) {
        self.inner.handlers.lock().remove(&token.0);
    }

    async fn write_with_result(&self, value: Bytes) -> GattResult<()> {
        if let Some(status) = *self.inner.write_failure.lock() {
            return Err(status);
        }
        self.inner.writes.lock().push(value);
        Ok(())
    }
}
