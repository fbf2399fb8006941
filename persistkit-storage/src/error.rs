//! Error types for the storage layer.

use persistkit_crypto::CryptoError;
use persistkit_model::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No row with this primary key.
    #[error("{entity} with {key_field}='{key}' not found")]
    NotFound {
        entity: String,
        key_field: String,
        key: String,
    },

    /// A primary-key or unique constraint rejected the write.
    ///
    /// For a composite constraint `field` is the comma-joined group and
    /// `value` joins the members' values the same way.
    #[error("{entity} with {field}='{value}' already exists")]
    DuplicateKey {
        entity: String,
        field: String,
        value: String,
    },

    /// Bad definition, record, predicate, or ordering.
    #[error("validation error: {0}")]
    Validation(String),

    /// The stored overflow did not decode to an object.
    #[error("{entity} '{key}' has a payload that is not a JSON object")]
    CorruptPayload { entity: String, key: String },

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Overflow encoding failed.
    #[error("codec error: {0}")]
    Crypto(#[from] CryptoError),

    /// Definition or record rejected by the model layer.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A connection or cache lock was poisoned by a panicking holder.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A blocking task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl StorageError {
    /// True for failures caused by the caller's input rather than storage.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::Validation(_) | StorageError::Model(ModelError::Validation { .. })
        )
    }
}
