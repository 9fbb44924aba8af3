//! heatsrv error types

use heatlink_calc::CalcError;
use heatlink_modbus::ModbusError;
use thiserror::Error;

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Coordinator could not reach the device during setup
    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("Point not found: {0}")]
    PointNotFound(String),

    #[error("Point is read-only: {0}")]
    ReadOnly(String),

    #[error(transparent)]
    Modbus(#[from] ModbusError),

    #[error(transparent)]
    Calc(#[from] CalcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    pub fn point_not_found(id: impl Into<String>) -> Self {
        Self::PointNotFound(id.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
