//! Controller configuration.

use std::time::Duration;

use crate::ble::constants::{bluetooth_le_filter, DEFAULT_REQUESTED_PROPERTIES};
use crate::ble::platform::{DeviceInformationKind, WatcherQuery};

/// Configuration for a [`crate::BleController`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerConfig {
    /// Query used to create the discovery watcher.
    pub watcher_query: WatcherQuery,
    /// Maximum time a discovery run may wait for a terminal event.
    ///
    /// `None` waits until the watcher stops on its own.
    pub discovery_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watcher_query: WatcherQuery::default(),
            discovery_timeout: None,
        }
    }
}

impl ControllerConfig {
    /// Set the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    /// Replace the watcher query.
    pub fn with_watcher_query(mut self, query: WatcherQuery) -> Self {
        self.watcher_query = query;
        self
    }

    /// Request an additional enumeration property.
    pub fn with_requested_property(mut self, property: impl Into<String>) -> Self {
        let property = property.into();
        if !self.watcher_query.requested_properties.contains(&property) {
            self.watcher_query.requested_properties.push(property);
        }
        self
    }
}

impl Default for WatcherQuery {
    fn default() -> Self {
        Self {
            filter: bluetooth_le_filter(),
            requested_properties: DEFAULT_REQUESTED_PROPERTIES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            kind: DeviceInformationKind::AssociationEndpoint,
        }
    }
}
