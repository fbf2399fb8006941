//! Key derivation and management.
//!
//! Uses PBKDF2-HMAC-SHA256 to derive the overflow encryption key from an
//! externally supplied secret and salt.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count used for every derived overflow key.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a new derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives the overflow key from a secret and salt.
///
/// PBKDF2-HMAC-SHA256, [`PBKDF2_ITERATIONS`] rounds, [`KEY_SIZE`]-byte output.
/// The same secret and salt always yield the same key.
pub fn derive_key(secret: &str, salt: &str) -> CryptoResult<DerivedKey> {
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation("secret must not be empty".into()));
    }
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("salt must not be empty".into()));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key_bytes,
    );
    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Generates a random encryption key (tests and pre-provisioned keys).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}
