//! Out-of-band encryption settings.

use crate::error::{CryptoError, CryptoResult};
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable holding the overflow encryption secret.
pub const ENV_SECRET: &str = "PERSISTKIT_ENCRYPTION_KEY";

/// Environment variable holding the PBKDF2 salt.
pub const ENV_SALT: &str = "PERSISTKIT_ENCRYPTION_SALT";

/// Secret and salt for deriving the overflow key.
///
/// Never stored in code or schema. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionSettings {
    secret: String,
    salt: String,
}

impl EncryptionSettings {
    pub fn new(secret: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            salt: salt.into(),
        }
    }

    /// Reads [`ENV_SECRET`] and [`ENV_SALT`].
    pub fn from_env() -> CryptoResult<Self> {
        Ok(Self::new(read_env(ENV_SECRET)?, read_env(ENV_SALT)?))
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }
}

fn read_env(name: &str) -> CryptoResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) => Err(CryptoError::MissingSetting(format!("{name} is empty"))),
        Err(_) => Err(CryptoError::MissingSetting(format!("{name} is not set"))),
    }
}

impl std::fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("secret", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .finish()
    }
}
