//! Utility functions for the bluetooth-le-controller crate.

use btleplug::api::CharPropFlags;
use uuid::Uuid;

use crate::ble::record::DeviceRecord;

/// Check whether a boolean enumeration property is present and true.
///
/// Missing properties and non-boolean values count as false.
///
/// # Example
///
/// ```
/// use bluetooth_le_controller::ble::{constants::IS_CONNECTABLE, DeviceRecord};
/// use bluetooth_le_controller::utils::lookup_bool_property;
///
/// let record = DeviceRecord::new("id", "Sensor").with_property(IS_CONNECTABLE, true);
/// assert!(lookup_bool_property(&record, IS_CONNECTABLE));
/// ```
#[inline]
pub fn lookup_bool_property(record: &DeviceRecord, property: &str) -> bool {
    record
        .property(property)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Check whether every bit of `flags` is set in `value`.
#[inline]
pub fn has_flag(value: CharPropFlags, flags: CharPropFlags) -> bool {
    value.contains(flags)
}

/// Canonical braced text form of a GUID, e.g. `{0000180a-0000-1000-8000-00805f9b34fb}`.
///
/// Service patterns are matched against this form.
#[inline]
pub fn braced_guid(uuid: &Uuid) -> String {
    uuid.braced().to_string()
}
