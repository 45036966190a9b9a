//! Error types for the bluetooth-le-controller crate.

use std::fmt;

use thiserror::Error;

use crate::ble::platform::CommunicationStatus;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No device is bound, or discovery finished without a matching device.
    #[error("Bluetooth LE device not found")]
    DeviceNotFound,

    /// A device is bound but reports that it is disconnected.
    #[error("Bluetooth LE device disconnected")]
    DeviceDisconnected,

    /// A device is already bound; it must be disconnected before rebinding.
    #[error("A Bluetooth LE device is already bound")]
    DeviceAlreadyBound,

    /// No GATT service is bound, or none matched the pattern.
    #[error("GATT device service not found")]
    ServiceNotFound,

    /// The service exposes neither a write nor a notify characteristic.
    #[error("GATT characteristics with write and notify properties not found")]
    CharacteristicsNotFound,

    /// The service exposes no characteristic with the write property.
    #[error("GATT characteristic with write property not found")]
    WritePropertyNotFound,

    /// The service exposes no characteristic with the notify property.
    #[error("GATT characteristic with notify property not found")]
    NotifyPropertyNotFound,

    /// A round-trip to the peripheral completed with a non-success status.
    #[error("GATT communication failed: {0}")]
    Communication(CommunicationStatus),

    /// A matching pattern could not be compiled.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The numeric code recorded in the controller's last-error slot.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DeviceNotFound => ErrorCode::DEVICE_NOT_FOUND,
            Self::DeviceDisconnected => ErrorCode::DEVICE_DISCONNECTED,
            Self::ServiceNotFound => ErrorCode::SERVICE_NOT_FOUND,
            Self::CharacteristicsNotFound => ErrorCode::PROPERTIES_NOT_FOUND,
            Self::WritePropertyNotFound => ErrorCode::WRITE_PROPERTY_NOT_FOUND,
            Self::NotifyPropertyNotFound => ErrorCode::NOTIFY_PROPERTY_NOT_FOUND,
            Self::Communication(status) => ErrorCode::communication(*status),
            Self::Bluetooth(_)
            | Self::BluetoothUnavailable
            | Self::DeviceAlreadyBound
            | Self::InvalidPattern(_)
            | Self::Internal(_) => ErrorCode::ERROR,
        }
    }
}

impl From<CommunicationStatus> for Error {
    fn from(status: CommunicationStatus) -> Self {
        Self::Communication(status)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric failure code readable after a failed controller operation.
///
/// Codes are partitioned into a small fixed block above [`ErrorCode::ERROR`]
/// followed by communication-status codes offset by the transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Base of the code block; also used for failures outside the taxonomy.
    pub const ERROR: Self = Self(0x6900_0000);
    /// No device bound or none matched.
    pub const DEVICE_NOT_FOUND: Self = Self(Self::ERROR.0 + 0x1);
    /// Bound device is disconnected.
    pub const DEVICE_DISCONNECTED: Self = Self(Self::ERROR.0 + 0x2);
    /// No service bound or none matched.
    pub const SERVICE_NOT_FOUND: Self = Self(Self::ERROR.0 + 0x3);
    /// Neither write nor notify characteristic found.
    pub const PROPERTIES_NOT_FOUND: Self = Self(Self::SERVICE_NOT_FOUND.0 + 0x1);
    /// Write characteristic missing.
    pub const WRITE_PROPERTY_NOT_FOUND: Self = Self(Self::SERVICE_NOT_FOUND.0 + 0x2);
    /// Notify characteristic missing.
    pub const NOTIFY_PROPERTY_NOT_FOUND: Self = Self(Self::SERVICE_NOT_FOUND.0 + 0x3);
    /// Peripheral unreachable during a round-trip.
    pub const UNREACHABLE: Self = Self::communication(CommunicationStatus::Unreachable);
    /// Protocol error during a round-trip.
    pub const PROTOCOL_ERROR: Self = Self::communication(CommunicationStatus::ProtocolError);
    /// Access denied during a round-trip.
    pub const ACCESS_DENIED: Self = Self::communication(CommunicationStatus::AccessDenied);

    /// Code for a failed round-trip with the given transport status.
    pub const fn communication(status: CommunicationStatus) -> Self {
        Self(Self::NOTIFY_PROPERTY_NOT_FOUND.0 + status as u32)
    }

    /// Raw numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
