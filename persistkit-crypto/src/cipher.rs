//! Overflow encryption using ChaCha20-Poly1305.
//!
//! A sealed payload is stored as URL-safe base64 of `nonce || ciphertext || tag`
//! so it fits a text column.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A sealed payload split into its nonce and tagged ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Length of the binary form (`nonce || ciphertext`).
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Column text form.
    pub fn to_text(&self) -> String {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        URL_SAFE.encode(&bytes)
    }

    /// Parses the column text form. Fails on bad base64 or a payload too
    /// short to hold a nonce and tag.
    pub fn from_text(text: &str) -> CryptoResult<Self> {
        let bytes = URL_SAFE
            .decode(text.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "sealed payload too short ({} bytes)",
                bytes.len()
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        Ok(Self {
            nonce,
            ciphertext: bytes[NONCE_SIZE..].to_vec(),
        })
    }
}

/// Encrypts plaintext under a fresh random nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<Sealed> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypts and authenticates a sealed payload.
pub fn open(key: &DerivedKey, sealed: &Sealed) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

/// Seals a UTF-8 string straight to column text.
pub fn seal_text(key: &DerivedKey, plaintext: &str) -> CryptoResult<String> {
    Ok(seal(key, plaintext.as_bytes())?.to_text())
}

/// Opens column text back into a UTF-8 string.
pub fn open_text(key: &DerivedKey, text: &str) -> CryptoResult<String> {
    let plaintext = open(key, &Sealed::from_text(text)?)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
}
