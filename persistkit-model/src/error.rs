//! Error types for entity definitions and records.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building definitions or validating records.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The definition or record violates an invariant.
    #[error("invalid {entity}: {message}")]
    Validation { entity: String, message: String },

    /// A different definition is already cataloged under this table name.
    #[error("table '{0}' is already cataloged with a different definition")]
    DuplicateTable(String),

    /// The catalog lock was poisoned by a panicking writer.
    #[error("catalog lock poisoned")]
    LockPoisoned,
}

impl ModelError {
    pub(crate) fn validation(entity: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}
