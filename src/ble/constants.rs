//! Enumeration property names and protocol identifiers.

use uuid::Uuid;

/// Property: the peripheral currently holds a link with this host.
pub const IS_CONNECTED: &str = "System.Devices.Aep.IsConnected";
/// Property: the peripheral advertises as connectable.
pub const IS_CONNECTABLE: &str = "System.Devices.Aep.Bluetooth.Le.IsConnectable";
/// Property: the peripheral's Bluetooth address.
pub const DEVICE_ADDRESS: &str = "System.Devices.Aep.DeviceAddress";

/// Protocol identifier of Bluetooth LE association endpoints.
pub const BLUETOOTH_LE_PROTOCOL_ID: Uuid =
    Uuid::from_u128(0xbb7bb05e_5972_42b5_94fc_76eaa7084d49);

/// Properties requested from the watcher by default.
pub const DEFAULT_REQUESTED_PROPERTIES: [&str; 3] = [DEVICE_ADDRESS, IS_CONNECTED, IS_CONNECTABLE];

/// Filter expression scoping a watcher to Bluetooth LE association endpoints.
pub fn bluetooth_le_filter() -> String {
    format!(
        "(System.Devices.Aep.ProtocolId:=\"{}\")",
        BLUETOOTH_LE_PROTOCOL_ID.braced()
    )
}
