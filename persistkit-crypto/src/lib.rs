//! Overflow codec for Persistkit.
//!
//! Each persisted row keeps its full entity payload in a single text column.
//! This crate turns a payload into that text and back:
//!
//! - Canonical JSON serialization (sorted keys, compact)
//! - Optional ChaCha20-Poly1305 sealing under a PBKDF2-HMAC-SHA256 key
//! - A decode path that never fails and reports how it got its value
//!
//! # Key derivation
//!
//! ```text
//! secret + salt ──► PBKDF2-SHA256 (100k rounds) ──► 32-byte key
//! ```
//!
//! The key is derived once per [`OverflowCodec`] and zeroized on drop.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod key;
pub mod settings;

pub use cipher::{open, open_text, seal, seal_text, Sealed, NONCE_SIZE, TAG_SIZE};
pub use codec::{canonical_json, Decoded, OverflowCodec};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KEY_SIZE, PBKDF2_ITERATIONS};
pub use settings::{EncryptionSettings, ENV_SALT, ENV_SECRET};
