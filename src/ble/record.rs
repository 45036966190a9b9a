//! Device records produced by the enumeration subsystem.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Value of a named enumeration property.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyValue {
    /// Boolean property.
    Bool(bool),
    /// Integer property.
    Int(i64),
    /// Text property.
    Text(String),
}

impl PropertyValue {
    /// The boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Latest known state of one enumerated device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceRecord {
    /// Stable identifier.
    pub id: String,
    /// Display name. May be localized and may change.
    pub name: String,
    /// Named properties.
    pub properties: HashMap<String, PropertyValue>,
    /// When the record was last added or updated.
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// Create a record with no properties.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            properties: HashMap::new(),
            last_seen: Utc::now(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Merge an incremental update into this record.
    ///
    /// Properties present in the update overwrite existing ones; the name
    /// changes only if the update carries one.
    pub fn apply(&mut self, update: &DeviceRecordUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        for (key, value) in &update.properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self.last_seen = Utc::now();
    }
}

/// Incremental change to a device record.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceRecordUpdate {
    /// Identifier of the record to update.
    pub id: String,
    /// New display name, if it changed.
    pub name: Option<String>,
    /// Changed properties.
    pub properties: HashMap<String, PropertyValue>,
}

impl DeviceRecordUpdate {
    /// Create an update that changes nothing.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style name setter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}
