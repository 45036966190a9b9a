//! Caller-facing controller for a single Bluetooth LE GATT session.
//!
//! Every operation returns a [`Result`]; on failure the error's
//! [`ErrorCode`] is also stored and can be read back with
//! [`BleController::last_error`]. Partial progress is kept on failure so the
//! next step can be retried without redoing discovery.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::ble::characteristics::ValueChangedEvent;
use crate::ble::connection::Session;
use crate::ble::platform::{BlePlatform, GattService, ServiceOf};
use crate::ble::record::DeviceRecord;
use crate::ble::scanner::DiscoveryController;
use crate::ble::selection::{select_service, SelectionMode};
use crate::config::ControllerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::pattern::Pattern;

/// Discovers, binds and drives one peripheral.
///
/// Operations take `&mut self`: a controller is driven by one task at a time.
pub struct BleController<P: BlePlatform> {
    platform: P,
    config: ControllerConfig,
    session: Session<P::Device>,
    discovered: HashMap<String, DeviceRecord>,
    last_error: Option<ErrorCode>,
}

impl<P: BlePlatform> BleController<P> {
    /// Create a controller with the default configuration.
    pub fn new(platform: P) -> Self {
        Self::with_config(platform, ControllerConfig::default())
    }

    /// Create a controller with a custom configuration.
    pub fn with_config(platform: P, config: ControllerConfig) -> Self {
        Self {
            platform,
            config,
            session: Session::new(),
            discovered: HashMap::new(),
            last_error: None,
        }
    }

    /// The platform this controller drives.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The active configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Code of the most recent failure.
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    /// Bound handles.
    pub fn session(&self) -> &Session<P::Device> {
        &self.session
    }

    /// The bound device.
    pub fn device(&self) -> Option<&P::Device> {
        self.session.device()
    }

    /// The bound service.
    pub fn service(&self) -> Option<&ServiceOf<P::Device>> {
        self.session.service()
    }

    /// Named devices known at the end of the most recent discovery run.
    pub fn discovered_devices(&self) -> &HashMap<String, DeviceRecord> {
        &self.discovered
    }

    /// Connect to the first connectable device whose identifier matches `pattern`.
    pub async fn connect_by_id(&mut self, pattern: &str) -> Result<()> {
        let result = self.connect(pattern, SelectionMode::ById).await;
        self.record(result)
    }

    /// Connect to the first connectable device whose display name matches `pattern`.
    ///
    /// Display names may be localized.
    pub async fn connect_by_name(&mut self, pattern: &str) -> Result<()> {
        let result = self.connect(pattern, SelectionMode::ByName).await;
        self.record(result)
    }

    /// Connect to the first connectable device exposing a service whose
    /// braced GUID matches `pattern`, and bind that service.
    ///
    /// GUIDs have the form `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
    pub async fn connect_by_service(&mut self, pattern: &str) -> Result<()> {
        let result = self.connect_by_service_inner(pattern).await;
        self.record(result)
    }

    /// Bind the first service of the bound device whose braced GUID matches `pattern`.
    ///
    /// GUIDs have the form `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
    pub async fn select_service(&mut self, pattern: &str) -> Result<()> {
        let result = self.select_service_inner(pattern).await;
        self.record(result)
    }

    /// Bind the write and notify characteristics of the bound service.
    ///
    /// Notifications are armed on the notify characteristic and
    /// `on_value_changed` is called with every pushed value.
    pub async fn select_characteristics<F>(&mut self, on_value_changed: F) -> Result<()>
    where
        F: Fn(ValueChangedEvent) + Send + Sync + 'static,
    {
        let result = self
            .session
            .select_characteristics(Arc::new(on_value_changed))
            .await;
        self.record(result)
    }

    /// Write raw bytes and wait for the peripheral's acknowledgement.
    pub async fn write(&mut self, payload: &[u8]) -> Result<()> {
        let result = self.session.write(Bytes::copy_from_slice(payload)).await;
        self.record(result)
    }

    /// Write UTF-8 text and wait for the peripheral's acknowledgement.
    pub async fn write_str(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes()).await
    }

    /// Release all bound handles. Succeeds when nothing is bound.
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.session.close().await;
        self.record(result)
    }

    async fn connect(&mut self, pattern: &str, mode: SelectionMode) -> Result<()> {
        let pattern = Pattern::new(pattern)?;
        if self.session.has_device() {
            return Err(Error::DeviceAlreadyBound);
        }

        let outcome = DiscoveryController::new(
            &self.platform,
            &self.config.watcher_query,
            self.config.discovery_timeout,
        )
        .discover(&pattern, mode)
        .await?;
        self.discovered = outcome.seen;

        let selection = outcome.selection.ok_or_else(|| mode.not_found_error())?;
        self.session.bind_device(selection.device);
        if let Some(service) = selection.service {
            self.session.bind_service(service);
        }
        Ok(())
    }

    async fn connect_by_service_inner(&mut self, pattern: &str) -> Result<()> {
        self.connect(pattern, SelectionMode::ByServiceGuid).await?;
        self.session.ensure_connected().await
    }

    async fn select_service_inner(&mut self, pattern: &str) -> Result<()> {
        let pattern = Pattern::new(pattern)?;
        let device = self.session.device().ok_or(Error::DeviceNotFound)?;

        let service = select_service(device, &pattern)
            .await
            .ok_or(Error::ServiceNotFound)?;

        if let Some(previous) = self.session.service.take() {
            debug!("Replacing service {}", previous.uuid());
            previous.close().await;
        }
        self.session.bind_service(service);

        self.session.ensure_connected().await
    }

    fn record(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            let code = e.code();
            warn!("Operation failed ({}): {}", code, e);
            self.last_error = Some(code);
        }
        result
    }
}
