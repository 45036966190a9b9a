//! Session state and teardown.
//!
//! Holds the four exclusively-owned handles of one controller and releases
//! them in a fixed order.

use tracing::{debug, info};

use crate::ble::characteristics::NotifySubscription;
use crate::ble::platform::{
    BleDevice, CharacteristicOf, ConnectionStatus, GattService, ServiceOf, SessionStatus,
};
use crate::error::{Error, Result};

/// Handles bound by one controller.
///
/// A service is only bound while a device is bound; both characteristics
/// come from the bound service.
pub struct Session<D: BleDevice> {
    pub(crate) device: Option<D>,
    pub(crate) service: Option<ServiceOf<D>>,
    pub(crate) write: Option<CharacteristicOf<D>>,
    pub(crate) notify: Option<NotifySubscription<CharacteristicOf<D>>>,
}

impl<D: BleDevice> Default for Session<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: BleDevice> Session<D> {
    /// Create an empty session.
    pub fn new() -> Self {
        Self {
            device: None,
            service: None,
            write: None,
            notify: None,
        }
    }

    /// The bound device.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// The bound service.
    pub fn service(&self) -> Option<&ServiceOf<D>> {
        self.service.as_ref()
    }

    /// Check if a device is bound.
    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Check if a service is bound.
    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Check if a write characteristic is bound.
    pub fn has_write_characteristic(&self) -> bool {
        self.write.is_some()
    }

    /// Check if a notify characteristic is bound.
    pub fn has_notify_characteristic(&self) -> bool {
        self.notify.is_some()
    }

    /// Check if all four handles are empty.
    pub fn is_empty(&self) -> bool {
        self.device.is_none() && self.service.is_none() && self.write.is_none() && self.notify.is_none()
    }

    pub(crate) fn bind_device(&mut self, device: D) {
        info!("Bound device {}", device.id());
        self.device = Some(device);
    }

    pub(crate) fn bind_service(&mut self, service: ServiceOf<D>) {
        info!("Bound service {}", service.uuid());
        self.service = Some(service);
    }

    /// Fail unless a device is bound and connected.
    pub async fn ensure_connected(&self) -> Result<()> {
        let device = self.device.as_ref().ok_or(Error::DeviceNotFound)?;
        if device.connection_status().await == ConnectionStatus::Disconnected {
            return Err(Error::DeviceDisconnected);
        }
        Ok(())
    }

    /// Release every bound handle.
    ///
    /// Order: device, notify descriptor, write characteristic, service
    /// session and service. The device is closed before the notify
    /// descriptor is reverted; callers rely on this order. When no active
    /// service session was closed, the device's link is dropped last.
    ///
    /// If reverting the descriptor fails the notify characteristic stays
    /// bound and the service is left open, so the call can be retried.
    /// Calling this on an empty session succeeds without side effects.
    pub async fn close(&mut self) -> Result<()> {
        let mut link_up = true;
        let closed_device = self.device.take();
        if let Some(device) = &closed_device {
            let status = device.connection_status().await;
            debug!("Closing device {} ({})", device.id(), status);
            link_up = status.is_connected();
            device.close().await;
        }

        if let Some(subscription) = self.notify.take() {
            if link_up {
                let result = subscription.disarm().await;
                if let Err(e) = result {
                    self.notify = Some(subscription);
                    return Err(e);
                }
            } else {
                debug!("Link already down, dropping notify subscription without round-trip");
            }
        }

        self.write = None;

        let mut session_closed = false;
        if let Some(service) = self.service.take() {
            if service.session_status().await == SessionStatus::Active {
                service.close_session().await;
                session_closed = true;
            }
            service.close().await;
        }

        if let Some(device) = closed_device {
            if link_up && !session_closed {
                device.disconnect().await;
            }
        }

        info!("Session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::characteristics::ValueChangedEvent;
    use crate::ble::platform::{ClientConfiguration, CommunicationStatus, ValueChangedHandler};
    use crate::testing::{FakeCharacteristic, FakeDevice, FakeService};
    use btleplug::api::CharPropFlags;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use uuid::Uuid;

    fn handler() -> ValueChangedHandler {
        Arc::new(|_: ValueChangedEvent| {})
    }

    async fn full_session(
        notify: FakeCharacteristic,
    ) -> (Session<FakeDevice>, FakeDevice, FakeService) {
        let service = FakeService::new(Uuid::from_u128(0x10))
            .with_characteristic(FakeCharacteristic::new(1, CharPropFlags::WRITE))
            .with_characteristic(notify);
        let device = FakeDevice::new("dev-1").with_service(service.clone());
        let mut session = Session::new();
        session.bind_device(device.clone());
        session.bind_service(service.clone());
        session.select_characteristics(handler()).await.unwrap();
        (session, device, service)
    }

    #[tokio::test]
    async fn test_close_empty_session_is_idempotent() {
        let mut session: Session<FakeDevice> = Session::new();
        assert!(session.close().await.is_ok());
        assert!(session.close().await.is_ok());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_in_order() {
        let notify = FakeCharacteristic::new(2, CharPropFlags::NOTIFY);
        let (mut session, device, service) = full_session(notify.clone()).await;
        device.log().clear();

        session.close().await.unwrap();

        assert!(session.is_empty());
        assert_eq!(notify.configuration(), ClientConfiguration::None);
        assert_eq!(notify.handler_count(), 0);
        assert!(device.is_closed());
        assert!(service.is_closed());
        assert_eq!(
            device.log().entries(),
            vec![
                "device.close".to_string(),
                "characteristic.configure None".to_string(),
                "service.close_session".to_string(),
                "service.close".to_string(),
            ]
        );

        assert!(session.close().await.is_ok());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_close_retries_after_descriptor_failure() {
        let notify = FakeCharacteristic::new(2, CharPropFlags::NOTIFY);
        let (mut session, device, service) = full_session(notify.clone()).await;

        notify.fail_configuration_with(Some(CommunicationStatus::Unreachable));
        let err = session.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Communication(CommunicationStatus::Unreachable)
        ));
        assert!(!session.has_device());
        assert!(device.is_closed());
        assert!(session.has_notify_characteristic());
        assert!(session.has_service());
        assert!(!service.is_closed());

        notify.fail_configuration_with(None);
        session.close().await.unwrap();
        assert!(session.is_empty());
        assert_eq!(notify.configuration(), ClientConfiguration::None);
        assert!(service.is_closed());
    }

    #[tokio::test]
    async fn test_close_disconnected_device_skips_round_trip() {
        let notify = FakeCharacteristic::new(2, CharPropFlags::NOTIFY);
        let (mut session, device, _service) = full_session(notify.clone()).await;
        device.set_connection(ConnectionStatus::Disconnected);
        notify.fail_configuration_with(Some(CommunicationStatus::Unreachable));

        session.close().await.unwrap();
        assert!(session.is_empty());
        assert_eq!(notify.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_session_is_not_closed() {
        let service = FakeService::new(Uuid::from_u128(0x10));
        service.set_session(SessionStatus::Closed);
        let device = FakeDevice::new("dev-1").with_service(service.clone());
        let mut session = Session::new();
        session.bind_device(device.clone());
        session.bind_service(service.clone());

        session.close().await.unwrap();
        assert_eq!(
            device.log().entries(),
            vec![
                "device.close".to_string(),
                "service.close".to_string(),
                "device.disconnect".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_without_service_drops_link() {
        let device = FakeDevice::new("dev-1");
        let mut session = Session::new();
        session.bind_device(device.clone());

        session.close().await.unwrap();
        assert!(session.is_empty());
        assert_eq!(device.connection(), ConnectionStatus::Disconnected);
        assert_eq!(
            device.log().entries(),
            vec!["device.close".to_string(), "device.disconnect".to_string()]
        );
    }

    #[tokio::test]
    async fn test_close_disconnected_device_without_service() {
        let device = FakeDevice::new("dev-1");
        device.set_connection(ConnectionStatus::Disconnected);
        let mut session = Session::new();
        session.bind_device(device.clone());

        session.close().await.unwrap();
        assert_eq!(device.log().entries(), vec!["device.close".to_string()]);
    }

    #[tokio::test]
    async fn test_close_reverts_every_notify_descriptor() {
        let first = FakeCharacteristic::new(2, CharPropFlags::NOTIFY);
        let second = FakeCharacteristic::new(3, CharPropFlags::NOTIFY);
        let service = FakeService::new(Uuid::from_u128(0x10))
            .with_characteristic(FakeCharacteristic::new(1, CharPropFlags::WRITE))
            .with_characteristic(first.clone())
            .with_characteristic(second.clone());
        let device = FakeDevice::new("dev-1").with_service(service.clone());
        let mut session = Session::new();
        session.bind_device(device);
        session.bind_service(service);
        session.select_characteristics(handler()).await.unwrap();

        session.close().await.unwrap();
        assert_eq!(first.configuration(), ClientConfiguration::None);
        assert_eq!(second.configuration(), ClientConfiguration::None);
        assert_eq!(first.handler_count(), 0);
        assert_eq!(second.handler_count(), 0);
    }
}
