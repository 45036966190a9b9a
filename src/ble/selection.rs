//! Device and service selection.
//!
//! Decides whether a discovered record qualifies for a pattern and, if it
//! does, resolves the live handles to bind.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::ble::constants::IS_CONNECTABLE;
use crate::ble::platform::{BleDevice, BlePlatform, CacheMode, GattService, ServiceOf};
use crate::ble::record::DeviceRecord;
use crate::error::Error;
use crate::pattern::Pattern;
use crate::utils::{braced_guid, lookup_bool_property};

/// Which record field participates in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionMode {
    /// Match the enumeration identifier.
    ById,
    /// Match the display name.
    ByName,
    /// Match the braced GUID of one of the device's GATT services.
    ByServiceGuid,
}

impl SelectionMode {
    /// Error reported when a discovery run ends without a match.
    pub fn not_found_error(&self) -> Error {
        match self {
            Self::ById | Self::ByName => Error::DeviceNotFound,
            Self::ByServiceGuid => Error::ServiceNotFound,
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById => write!(f, "by-identifier"),
            Self::ByName => write!(f, "by-display-name"),
            Self::ByServiceGuid => write!(f, "by-service-GUID"),
        }
    }
}

/// Handles resolved by a successful selection.
///
/// In service mode the device and service are committed together.
pub struct Selection<D: BleDevice> {
    /// The selected device.
    pub device: D,
    /// The selected service, present in [`SelectionMode::ByServiceGuid`].
    pub service: Option<ServiceOf<D>>,
}

impl<D: BleDevice> fmt::Debug for Selection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("device", &self.device.id())
            .field("service", &self.service.as_ref().map(|s| s.uuid()))
            .finish()
    }
}

/// Applies one pattern and mode to discovered records.
pub struct Selector<'a, P: BlePlatform> {
    platform: &'a P,
    pattern: &'a Pattern,
    mode: SelectionMode,
}

impl<'a, P: BlePlatform> Selector<'a, P> {
    /// Create a selector.
    pub fn new(platform: &'a P, pattern: &'a Pattern, mode: SelectionMode) -> Self {
        Self {
            platform,
            pattern,
            mode,
        }
    }

    /// The selection mode.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Try to select `record`.
    ///
    /// Records that are not connectable are skipped without side effects.
    /// Platform failures while resolving handles count as "no match".
    /// In service mode a candidate without a matching service is
    /// disconnected and closed before returning.
    pub async fn try_select(&self, record: &DeviceRecord) -> Option<Selection<P::Device>> {
        if !lookup_bool_property(record, IS_CONNECTABLE) {
            trace!("Skipping non-connectable device {}", record.id);
            return None;
        }

        match self.mode {
            SelectionMode::ById | SelectionMode::ByName => {
                let subject = if self.mode == SelectionMode::ById {
                    &record.id
                } else {
                    &record.name
                };
                if !self.pattern.matches(subject) {
                    return None;
                }

                debug!("Device {} ({}) matches {}", record.id, record.name, self.pattern);
                let device = self.resolve(record).await?;
                Some(Selection {
                    device,
                    service: None,
                })
            }
            SelectionMode::ByServiceGuid => {
                let device = self.resolve(record).await?;
                let service = match select_service(&device, self.pattern).await {
                    Some(service) => service,
                    None => {
                        trace!("Releasing candidate {}", record.id);
                        device.disconnect().await;
                        device.close().await;
                        return None;
                    }
                };
                debug!(
                    "Device {} ({}) exposes service {} matching {}",
                    record.id,
                    record.name,
                    service.uuid(),
                    self.pattern
                );
                Some(Selection {
                    device,
                    service: Some(service),
                })
            }
        }
    }

    async fn resolve(&self, record: &DeviceRecord) -> Option<P::Device> {
        match self.platform.device_from_id(&record.id).await {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("Failed to open device {}: {}", record.id, e);
                None
            }
        }
    }
}

/// Find the first service of `device` whose braced GUID matches `pattern`.
///
/// Services are always fetched uncached.
pub async fn select_service<D: BleDevice>(device: &D, pattern: &Pattern) -> Option<ServiceOf<D>> {
    let services = match device.gatt_services(CacheMode::Uncached).await {
        Ok(services) => services,
        Err(status) => {
            debug!("Service enumeration on {} failed: {}", device.id(), status);
            return None;
        }
    };

    services.into_iter().find(|service| {
        let guid = braced_guid(&service.uuid());
        trace!("Checking service {} on {}", guid, device.id());
        pattern.matches(&guid)
    })
}
