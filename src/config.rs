//! Configuration types for the polling engine.
//!
//! `PortConfig`/`DeviceConfig`/`RegisterConfig` mirror the configuration
//! surface recognized by the engine. Loading is layered through `figment`
//! (YAML primary, environment overrides with a `POLLSRV_` prefix); each
//! type also exposes a `validate()` that the supervisor runs once at
//! startup, turning any violation into a fatal `PollError::ConfigInvalid`.

use std::collections::HashSet;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};

/// Modbus register kind, mapped 1:1 onto function codes 01-04.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Holding => "holding",
            RegisterKind::Input => "input",
            RegisterKind::Coil => "coil",
            RegisterKind::Discrete => "discrete",
        }
    }

    /// Whether this kind is addressed via a bit-oriented function code.
    pub fn is_bit_oriented(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Discrete)
    }
}

/// Decoded numeric/boolean type stored at a register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Bool,
}

impl DataType {
    /// Number of consecutive register addresses this type occupies.
    pub fn register_span(&self) -> u16 {
        match self {
            DataType::Int16 | DataType::UInt16 | DataType::Bool => 1,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 2,
        }
    }

    pub fn is_32bit(&self) -> bool {
        self.register_span() == 2
    }
}

/// Byte ordering within a single 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Big
    }
}

/// Ordering of the high/low words in a 32-bit value.
pub type WordOrder = ByteOrder;

fn default_scale() -> f64 {
    1.0
}

fn default_offset() -> f64 {
    0.0
}

fn default_precision() -> i32 {
    2
}

fn default_read_only() -> bool {
    true
}

/// Configuration for a single register mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub kind: RegisterKind,
    pub address: u16,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub data_type: DataType,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_offset")]
    pub offset: f64,
    #[serde(default = "default_precision")]
    pub precision: i32,
    pub byte_order: Option<ByteOrder>,
    pub word_order: Option<WordOrder>,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

impl RegisterConfig {
    /// Resolve this register's byte order, falling back to the port default.
    pub fn byte_order(&self, port_default: ByteOrder) -> ByteOrder {
        self.byte_order.unwrap_or(port_default)
    }

    /// Resolve this register's word order, falling back to the port default.
    pub fn word_order(&self, port_default: WordOrder) -> WordOrder {
        self.word_order.unwrap_or(port_default)
    }

    /// Last address this register occupies (inclusive).
    pub fn end_address(&self) -> u16 {
        self.address + self.data_type.register_span() - 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind.is_bit_oriented() && self.data_type != DataType::Bool {
            return Err(PollError::config_invalid(format!(
                "register {} ({:?}) must use Bool data type for coil/discrete kinds",
                self.name, self.kind
            )));
        }
        if self.data_type.is_32bit()
            && self.address.checked_add(1).is_none()
        {
            return Err(PollError::config_invalid(format!(
                "register {} address {} overflows a 32-bit span",
                self.name, self.address
            )));
        }
        Ok(())
    }
}

/// Configuration for a single polled device on a port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub unit_address: u8,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub registers: Vec<RegisterConfig>,
}

fn default_enabled() -> bool {
    true
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.unit_address == 0 || self.unit_address > 247 {
            return Err(PollError::config_invalid(format!(
                "device {}: unit_address {} must be in 1..=247",
                self.name, self.unit_address
            )));
        }
        if self.poll_interval_ms < 10 {
            return Err(PollError::config_invalid(format!(
                "device {}: poll_interval_ms {} must be >= 10",
                self.name, self.poll_interval_ms
            )));
        }

        let mut seen = HashSet::new();
        for reg in &self.registers {
            reg.validate()?;
            if !seen.insert((reg.kind, reg.address)) {
                return Err(PollError::config_invalid(format!(
                    "device {}: duplicate register ({:?}, {})",
                    self.name, reg.kind, reg.address
                )));
            }
        }
        Ok(())
    }
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parity {
    N,
    E,
    O,
}

/// Transport variant a port communicates over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp { host: String, port: u16 },
    RtuOverTcp { host: String, port: u16 },
    RtuSerial {
        #[serde(rename = "port_name")]
        device: String,
        baud_rate: u32,
        #[serde(default = "default_parity")]
        parity: Parity,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        #[serde(default = "default_byte_size")]
        byte_size: u8,
    },
}

fn default_parity() -> Parity {
    Parity::N
}

fn default_stop_bits() -> u8 {
    1
}

fn default_byte_size() -> u8 {
    8
}

const VALID_BAUD_RATES: [u32; 10] = [
    300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200,
];

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Tcp { host, .. } | TransportConfig::RtuOverTcp { host, .. } => {
                if host.is_empty() {
                    return Err(PollError::config_invalid("transport host must not be empty"));
                }
                Ok(())
            }
            TransportConfig::RtuSerial {
                device,
                baud_rate,
                stop_bits,
                byte_size,
                ..
            } => {
                if device.is_empty() {
                    return Err(PollError::config_invalid("serial device path must not be empty"));
                }
                if !VALID_BAUD_RATES.contains(baud_rate) {
                    return Err(PollError::config_invalid(format!(
                        "unsupported baud rate: {baud_rate}"
                    )));
                }
                if !(1..=2).contains(stop_bits) {
                    return Err(PollError::config_invalid(format!(
                        "stop_bits must be 1 or 2, got {stop_bits}"
                    )));
                }
                if !(5..=8).contains(byte_size) {
                    return Err(PollError::config_invalid(format!(
                        "byte_size must be 5..=8, got {byte_size}"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

/// Configuration for a single port: one transport and its devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_byte_order: ByteOrder,
    #[serde(default)]
    pub default_word_order: WordOrder,
    pub devices: Vec<DeviceConfig>,
}

impl PortConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PollError::config_invalid("port name must not be empty"));
        }
        self.transport.validate()?;
        for device in &self.devices {
            device.validate()?;
        }
        Ok(())
    }

    /// Minimum poll interval across enabled devices, used to pace the run loop.
    pub fn min_device_poll_interval_ms(&self) -> Option<u64> {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.poll_interval_ms)
            .min()
    }
}

/// Top-level application configuration: one entry per port.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

impl AppConfig {
    /// Load layered configuration: YAML file, then `POLLSRV_`-prefixed
    /// environment overrides, validating every port before returning.
    pub fn load(path: &str) -> Result<Self> {
        let config: AppConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("POLLSRV_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for port in &self.ports {
            port.validate()?;
            if !names.insert(port.name.clone()) {
                return Err(PollError::config_invalid(format!(
                    "duplicate port name: {}",
                    port.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_register(kind: RegisterKind, address: u16, data_type: DataType) -> RegisterConfig {
        RegisterConfig {
            kind,
            address,
            name: format!("reg_{address}"),
            unit: String::new(),
            data_type,
            scale: 1.0,
            offset: 0.0,
            precision: 2,
            byte_order: None,
            word_order: None,
            read_only: true,
        }
    }

    #[test]
    fn rejects_duplicate_register_address() {
        let device = DeviceConfig {
            name: "dev".into(),
            unit_address: 1,
            poll_interval_ms: 1000,
            timeout_ms: 500,
            enabled: true,
            registers: vec![
                sample_register(RegisterKind::Holding, 10, DataType::Int16),
                sample_register(RegisterKind::Holding, 10, DataType::UInt16),
            ],
        };
        assert!(device.validate().is_err());
    }

    #[test]
    fn rejects_bool_mismatch_for_coil() {
        let reg = sample_register(RegisterKind::Coil, 0, DataType::Int16);
        assert!(reg.validate().is_err());
    }

    #[test]
    fn rejects_bad_baud_rate() {
        let transport = TransportConfig::RtuSerial {
            device: "/dev/ttyUSB0".into(),
            baud_rate: 1234,
            parity: Parity::N,
            stop_bits: 1,
            byte_size: 8,
        };
        assert!(transport.validate().is_err());
    }

    #[test]
    fn min_device_poll_interval_ignores_disabled() {
        let port = PortConfig {
            name: "p1".into(),
            transport: TransportConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 502,
            },
            timeout_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
            enabled: true,
            default_byte_order: ByteOrder::Big,
            default_word_order: ByteOrder::Big,
            devices: vec![
                DeviceConfig {
                    name: "fast".into(),
                    unit_address: 1,
                    poll_interval_ms: 100,
                    timeout_ms: 500,
                    enabled: false,
                    registers: vec![],
                },
                DeviceConfig {
                    name: "slow".into(),
                    unit_address: 2,
                    poll_interval_ms: 2000,
                    timeout_ms: 500,
                    enabled: true,
                    registers: vec![],
                },
            ],
        };
        assert_eq!(port.min_device_poll_interval_ms(), Some(2000));
    }

    #[test]
    fn load_reads_yaml_and_validates() {
        let yaml = r#"
ports:
  - name: line1
    type: tcp
    host: 127.0.0.1
    port: 502
    devices:
      - name: meter1
        unit_address: 1
        poll_interval_ms: 1000
        timeout_ms: 500
        registers:
          - kind: holding
            address: 10
            name: voltage
            data_type: float32
"#;
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        std::fs::write(file.path(), yaml).unwrap();

        let config = AppConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.ports.len(), 1);
        assert_eq!(config.ports[0].name, "line1");
        assert_eq!(config.ports[0].devices[0].registers[0].data_type, DataType::Float32);
    }

    #[test]
    fn load_rejects_duplicate_port_names() {
        let yaml = r#"
ports:
  - name: line1
    type: tcp
    host: 127.0.0.1
    port: 502
    devices: []
  - name: line1
    type: tcp
    host: 127.0.0.1
    port: 503
    devices: []
"#;
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        std::fs::write(file.path(), yaml).unwrap();

        assert!(AppConfig::load(file.path().to_str().unwrap()).is_err());
    }
}
