//! Error types for interceptor construction, configuration and log emission

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the logging layer
///
/// None of these ever reach an RPC caller: construction and configuration
/// errors surface before the server starts, and emission errors are dropped by
/// the interceptor chain.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Loaded configuration is well-formed but semantically invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A logging option was rejected at construction time
    #[error("Invalid logging option: {0}")]
    InvalidOption(String),

    /// Field map could not be encoded by a logger backend
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Logger backend failed to emit a record
    #[error("Logger error: {0}")]
    Logger(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
