//! Error types for bulkcounterd

use sonic_bulk_counter::BulkCounterError;
use thiserror::Error;

/// Bulk counter daemon errors
#[derive(Error, Debug)]
pub enum BulkCounterdError {
    /// Engine rejected a call
    #[error("Engine error: {0}")]
    Engine(#[from] BulkCounterError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session setup error
    #[error("Session {name}: {message}")]
    Session { name: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BulkCounterdError {
    pub fn session(name: impl Into<String>, message: impl Into<String>) -> Self {
        BulkCounterdError::Session {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for bulkcounterd operations
pub type Result<T> = std::result::Result<T, BulkCounterdError>;
