//! Error types for the orgmodel crate

use thiserror::Error;

/// Errors that can occur working with descriptor documents
#[derive(Error, Debug)]
pub enum Error {
    /// Descriptor could not be serialized
    #[error("descriptor serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Descriptor could not be parsed
    #[error("descriptor parse error: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Result type for orgmodel operations
pub type Result<T> = std::result::Result<T, Error>;
