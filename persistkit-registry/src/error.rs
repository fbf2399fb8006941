//! Error types for the dynamic model registry.

use persistkit_crypto::CryptoError;
use persistkit_model::ModelError;
use persistkit_script::ScriptError;
use persistkit_storage::StorageError;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The submitted definition is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The model name or its table is already taken.
    #[error("cannot register '{name}': {reason}")]
    RegistrationConflict { name: String, reason: String },

    #[error("model not registered: {0}")]
    NotRegistered(String),

    #[error("entity script rejected: {0}")]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// The overflow key could not be derived from the configured settings.
    #[error("encryption setup failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("registry lock poisoned")]
    LockPoisoned,
}

impl RegistryError {
    pub(crate) fn conflict(name: &str, reason: impl Into<String>) -> Self {
        Self::RegistrationConflict {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the caller's definition or script was at fault.
    pub fn is_validation(&self) -> bool {
        match self {
            RegistryError::Validation(_) | RegistryError::Script(_) => true,
            RegistryError::Model(ModelError::Validation { .. }) => true,
            RegistryError::Storage(e) => e.is_validation(),
            _ => false,
        }
    }
}
