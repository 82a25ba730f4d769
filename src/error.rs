//! Error types for the graph GAN library.

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration, detected at resolution or
    /// construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Tensor shape disagrees with the shape the resolved configuration
    /// reserved for it
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    /// Parameter copy between structurally different networks
    #[error("Parameter mismatch: {0}")]
    ParameterMismatch(String),

    /// IO error (statistics cache)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a cached statistics file
    #[error("Failed to parse data: {0}")]
    Parse(String),

    /// Not enough samples for the requested statistic
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}
