//! Error handling for the Port Polling Engine.
//!
//! Covers the error taxonomy named by the component design (connection
//! loss, timeouts, protocol exceptions, decode failures, read-only writes,
//! unknown device/port, invalid configuration) plus the I/O and
//! serialization failures that come from owning real transports and config
//! files.

use thiserror::Error;

/// Polling engine error type.
#[derive(Error, Debug, Clone)]
pub enum PollError {
    /// A Modbus connection was lost or could not be (re)established.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A read or connect attempt exceeded its configured timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The slave returned a Modbus exception response.
    #[error("protocol exception: {0}")]
    ProtocolException(String),

    /// Raw words could not be decoded into a typed value.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Every planned block failed (or the device has no registers), so no
    /// register was decoded this cycle; no `Sample` is produced.
    #[error("no data: {0}")]
    NoData(String),

    /// A write was attempted against an input/discrete register.
    #[error("register is read-only: {0}")]
    ReadOnlyRegister(String),

    /// A write or status request named a device that does not exist on the port.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A request named a port that the engine does not own.
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// Configuration failed validation; fatal at engine startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Underlying I/O error surfaced while loading configuration or logs.
    #[error("io error: {0}")]
    Io(String),

    /// Configuration could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all for failures that don't fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for the polling engine.
pub type Result<T> = std::result::Result<T, PollError>;

impl From<std::io::Error> for PollError {
    fn from(err: std::io::Error) -> Self {
        PollError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PollError {
    fn from(err: serde_yaml::Error) -> Self {
        PollError::Serialization(format!("YAML error: {err}"))
    }
}

impl From<figment::Error> for PollError {
    fn from(err: figment::Error) -> Self {
        PollError::ConfigInvalid(format!("configuration error: {err}"))
    }
}

impl PollError {
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        PollError::ConnectionLost(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        PollError::Timeout(msg.into())
    }

    pub fn protocol_exception(msg: impl Into<String>) -> Self {
        PollError::ProtocolException(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        PollError::DecodeError(msg.into())
    }

    pub fn no_data(msg: impl Into<String>) -> Self {
        PollError::NoData(msg.into())
    }

    pub fn read_only(msg: impl Into<String>) -> Self {
        PollError::ReadOnlyRegister(msg.into())
    }

    pub fn unknown_device(msg: impl Into<String>) -> Self {
        PollError::UnknownDevice(msg.into())
    }

    pub fn unknown_port(msg: impl Into<String>) -> Self {
        PollError::UnknownPort(msg.into())
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        PollError::ConfigInvalid(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PollError::Internal(msg.into())
    }
}

/// Extension trait for adding context to foreign error types.
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn io_error(self, msg: &str) -> Result<T>;
    fn connection_error(self, msg: &str) -> Result<T>;
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| PollError::ConfigInvalid(format!("{msg}: {e}")))
    }

    fn io_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| PollError::Io(format!("{msg}: {e}")))
    }

    fn connection_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| PollError::ConnectionLost(format!("{msg}: {e}")))
    }

    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| PollError::Internal(format!("{msg}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_include_taxonomy_text() {
        assert_eq!(
            PollError::connection_lost("tcp reset").to_string(),
            "connection lost: tcp reset"
        );
        assert_eq!(
            PollError::read_only("holding_00010").to_string(),
            "register is read-only: holding_00010"
        );
    }

    #[test]
    fn error_ext_wraps_context() {
        let res: std::result::Result<(), &str> = Err("boom");
        let wrapped = res.config_error("loading port.yaml");
        assert!(matches!(wrapped, Err(PollError::ConfigInvalid(_))));
    }
}
