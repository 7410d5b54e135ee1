//! Runtime sample types produced by a poll cycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DataType, RegisterKind};

/// Confidence in a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// A numeric, boolean value decoded from one or two raw registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedValue {
    pub value: Value,
    /// Raw word(s) exactly as read from the device, before any byte/word
    /// reordering was applied.
    pub raw: (u16, Option<u16>),
    pub unit: String,
    pub description: String,
    pub quality: Quality,
}

/// The decoded scalar, tagged by shape rather than by the source `DataType`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl DecodedValue {
    /// Build a decoded value from an already-scaled numeric result.
    ///
    /// Scaling (`value * scale + offset`) can turn any integer register
    /// into a fractional reading, so every non-bool data type is
    /// represented as `Value::Float` once scaling has been applied — only
    /// the unscaled `raw` words stay integral.
    pub fn numeric(value: f64, _data_type: DataType, raw0: u16, raw1: Option<u16>) -> Self {
        DecodedValue {
            value: Value::Float(value),
            raw: (raw0, raw1),
            unit: String::new(),
            description: String::new(),
            quality: Quality::Good,
        }
    }

    pub fn boolean(value: bool, raw: u16) -> Self {
        DecodedValue {
            value: Value::Bool(value),
            raw: (raw, None),
            unit: String::new(),
            description: String::new(),
            quality: Quality::Good,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            Value::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn with_metadata(mut self, unit: impl Into<String>, description: impl Into<String>) -> Self {
        self.unit = unit.into();
        self.description = description.into();
        self
    }
}

/// Connectivity status of a device as of the most recent poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Timeout,
}

/// Format a register key as `<kind>_<address:05d>`, e.g. `holding_00010`.
pub fn register_key(kind: RegisterKind, address: u16) -> String {
    format!("{}_{:05}", kind.as_str(), address)
}

/// One device's decoded readings from a single poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub device_name: String,
    pub port_name: String,
    pub captured_at: DateTime<Utc>,
    pub registers: HashMap<String, DecodedValue>,
    pub device_status: DeviceStatus,
    pub poll_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_key_zero_pads_address() {
        assert_eq!(register_key(RegisterKind::Holding, 10), "holding_00010");
        assert_eq!(register_key(RegisterKind::Coil, 0), "coil_00000");
    }
}
