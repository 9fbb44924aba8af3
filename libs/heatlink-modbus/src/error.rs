//! Modbus Link Error Types
//!
//! Core error types for the register transport and connection handling.

use thiserror::Error;

use crate::constants::EXCEPTION_ILLEGAL_DATA_ADDRESS;

/// Result type for heatlink-modbus operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Modbus link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModbusError {
    /// Protocol-level errors (framing, mismatched responses)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exception response sent by the device
    #[error("Exception response: FC{function:02X} code {code:02X}")]
    Exception { function: u8, code: u8 },

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ModbusError::Protocol(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ModbusError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ModbusError::Config(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        ModbusError::InvalidData(msg.into())
    }

    /// Exception code 2: the register does not exist on this device
    pub fn is_illegal_address(&self) -> bool {
        matches!(
            self,
            ModbusError::Exception { code, .. } if *code == EXCEPTION_ILLEGAL_DATA_ADDRESS
        )
    }

    /// Check if this error leaves the session unusable
    pub fn needs_reconnect(&self) -> bool {
        match self {
            ModbusError::Io(_) | ModbusError::Connection(_) | ModbusError::NotConnected => true,
            ModbusError::Protocol(_) => true,
            _ => false,
        }
    }
}
