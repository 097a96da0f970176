//! Error types for the multiplexing engine

use thiserror::Error;

/// Errors that can occur in the engine and dispatcher
#[derive(Debug, Error)]
pub enum MuxError {
    /// A device with this identifier is already registered
    #[error("device already registered: {0}")]
    DeviceExists(String),

    /// The engine or dispatcher actor is no longer running
    #[error("engine is shut down")]
    EngineClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] pdu_script::ConfigError),
}
