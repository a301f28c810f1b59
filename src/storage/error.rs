//! Storage error types

use thiserror::Error;

/// Primitive engine errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Capability the engine does not offer
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Stored bytes cannot be represented in the requested format
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Key rejected by the engine
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value rejected by the engine
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Store already exists and `error_if_exists` was set
    #[error("Store already exists")]
    AlreadyExists,

    /// Store does not exist and `create_if_missing` was unset
    #[error("Store does not exist")]
    Missing,

    /// Engine-specific failure
    #[error("{0}")]
    Backend(String),

    /// Storage is closed
    #[error("Storage is closed")]
    Closed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
