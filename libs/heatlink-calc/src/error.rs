//! Error types for heatlink-calc

use thiserror::Error;

/// Calculation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Function error: {0}")]
    Function(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// User input that cannot be mapped to a register value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CalcError {
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn function(msg: impl Into<String>) -> Self {
        Self::Function(msg.into())
    }

    pub fn variable_not_found(name: impl Into<String>) -> Self {
        Self::VariableNotFound(name.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
