//! GATT characteristic handling.
//!
//! Selects the write and notify characteristics of the bound service, arms
//! notifications and performs writes.

use btleplug::api::CharPropFlags;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::connection::Session;
use crate::ble::platform::{
    BleDevice, CacheMode, ClientConfiguration, GattCharacteristic, GattService, HandlerToken,
    ValueChangedHandler,
};
use crate::error::{Error, Result};
use crate::utils::has_flag;

/// Value pushed by a notifying characteristic.
#[derive(Debug, Clone)]
pub struct ValueChangedEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub value: Bytes,
}

/// A characteristic with notifications armed and a handler attached.
///
/// Dropping the subscription unregisters the handler. Reverting the
/// descriptor is a round-trip and happens in [`Session::close`].
pub struct NotifySubscription<C: GattCharacteristic> {
    characteristic: C,
    token: Option<HandlerToken>,
}

impl<C: GattCharacteristic> NotifySubscription<C> {
    /// Configure the descriptor to notify, then attach `handler`.
    pub async fn arm(characteristic: C, handler: ValueChangedHandler) -> Result<Self> {
        characteristic
            .write_client_configuration(ClientConfiguration::Notify)
            .await?;
        let token = characteristic.add_value_changed(handler);
        debug!("Notifications armed on {}", characteristic.uuid());

        Ok(Self {
            characteristic,
            token: Some(token),
        })
    }

    /// The subscribed characteristic.
    pub fn characteristic(&self) -> &C {
        &self.characteristic
    }

    /// Revert the descriptor to `None`.
    pub async fn disarm(&self) -> Result<()> {
        self.characteristic
            .write_client_configuration(ClientConfiguration::None)
            .await?;
        debug!("Notifications disarmed on {}", self.characteristic.uuid());
        Ok(())
    }
}

impl<C: GattCharacteristic> Drop for NotifySubscription<C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.characteristic.remove_value_changed(token);
        }
    }
}

impl<D: BleDevice> Session<D> {
    /// Bind the write and notify characteristics of the bound service.
    ///
    /// Only the last notify-capable characteristic is armed. Bindings made
    /// before a failure are kept. A previous subscription that cannot be
    /// disarmed stays bound and the error is returned.
    pub async fn select_characteristics(&mut self, handler: ValueChangedHandler) -> Result<()> {
        self.ensure_connected().await?;

        if let Some(previous) = self.notify.take() {
            let result = previous.disarm().await;
            if let Err(e) = result {
                warn!("Failed to disarm previous notify characteristic: {}", e);
                self.notify = Some(previous);
                return Err(e);
            }
        }
        self.write = None;

        let characteristics = {
            let service = self.service.as_ref().ok_or(Error::ServiceNotFound)?;
            service.characteristics(CacheMode::Uncached).await?
        };
        debug!("Service exposes {} characteristics", characteristics.len());

        let mut notify = None;
        for characteristic in characteristics {
            let properties = characteristic.properties();
            trace!("Characteristic {} has {:?}", characteristic.uuid(), properties);

            if has_flag(properties, CharPropFlags::WRITE) {
                debug!("Write characteristic: {}", characteristic.uuid());
                self.write = Some(characteristic);
            } else if has_flag(properties, CharPropFlags::NOTIFY) {
                notify = Some(characteristic);
            }
        }

        if let Some(characteristic) = notify {
            self.notify = Some(NotifySubscription::arm(characteristic, handler).await?);
        }

        match (self.write.is_some(), self.notify.is_some()) {
            (true, true) => {
                info!("Write and notify characteristics selected");
                Ok(())
            }
            (false, false) => Err(Error::CharacteristicsNotFound),
            (false, true) => Err(Error::WritePropertyNotFound),
            (true, false) => Err(Error::NotifyPropertyNotFound),
        }
    }

    /// Write `payload` to the write characteristic and wait for the acknowledgement.
    pub async fn write(&self, payload: Bytes) -> Result<()> {
        self.ensure_connected().await?;

        let characteristic = self.write.as_ref().ok_or(Error::WritePropertyNotFound)?;
        let len = payload.len();
        characteristic.write_with_result(payload).await?;
        trace!("Wrote {} bytes to characteristic {}", len, characteristic.uuid());

        Ok(())
    }
}
