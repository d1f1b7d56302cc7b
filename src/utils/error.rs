use thiserror::Error;

use crate::modbus::protocol::CorrelationId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported data type for write: {0}")]
    UnsupportedDataType(String),

    #[error("Payload normalization failed: {0}")]
    Normalization(String),

    #[error("Correlation id already in flight: {0}")]
    DuplicateCorrelationId(CorrelationId),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport dropped write {0} without completing it")]
    Abandoned(CorrelationId),

    #[error("Endpoint not registered: {0}")]
    NotRegistered(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Timeout occurred")]
    Timeout,
}

impl From<serde_json::Error> for WriteError {
    fn from(err: serde_json::Error) -> Self {
        WriteError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for WriteError {
    fn from(err: toml::de::Error) -> Self {
        WriteError::ConfigError(format!("TOML error: {}", err))
    }
}

impl From<toml::ser::Error> for WriteError {
    fn from(err: toml::ser::Error) -> Self {
        WriteError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError::ConfigError(format!("IO error: {}", err))
    }
}
