//! The overflow codec.
//!
//! Every payload is serialized to canonical JSON (sorted keys, compact). An
//! encrypting codec then seals that text with ChaCha20-Poly1305 under a key
//! derived once from [`EncryptionSettings`].
//!
//! Decoding never fails. The outcome is spelled out by [`Decoded`] so callers
//! can tell a clean read from a fallback.

use crate::cipher;
use crate::error::CryptoResult;
use crate::key::{derive_key, DerivedKey};
use crate::settings::EncryptionSettings;
use serde_json::{Map, Value};
use tracing::debug;

/// Result of decoding a stored overflow text.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Codec without encryption; the text was valid JSON.
    Plain(Value),
    /// Authenticated decryption succeeded and the plaintext was JSON.
    Decrypted(Value),
    /// Decryption failed but the stored text is itself JSON, written before
    /// encryption was turned on.
    LegacyPlaintext(Value),
    /// Nothing decoded. Holds the stored text unchanged.
    Undecodable(String),
}

impl Decoded {
    /// True when the read did not go through the codec's normal path.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::LegacyPlaintext(_) | Decoded::Undecodable(_))
    }

    /// Borrowed value, if one was decoded.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Decoded::Plain(v) | Decoded::Decrypted(v) | Decoded::LegacyPlaintext(v) => Some(v),
            Decoded::Undecodable(_) => None,
        }
    }

    /// Collapses to a value. Undecodable text becomes a JSON string holding
    /// the stored text.
    pub fn into_value(self) -> Value {
        match self {
            Decoded::Plain(v) | Decoded::Decrypted(v) | Decoded::LegacyPlaintext(v) => v,
            Decoded::Undecodable(raw) => Value::String(raw),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Decoded::Plain(_) => "plain",
            Decoded::Decrypted(_) => "decrypted",
            Decoded::LegacyPlaintext(_) => "legacy_plaintext",
            Decoded::Undecodable(_) => "undecodable",
        }
    }
}

/// Serializes overflow payloads, optionally sealing them.
///
/// Immutable after construction and safe to share behind an `Arc`.
#[derive(Debug)]
pub struct OverflowCodec {
    key: Option<DerivedKey>,
}

impl OverflowCodec {
    /// A codec that stores canonical JSON as-is.
    pub fn plain() -> Self {
        Self { key: None }
    }

    /// A codec that seals payloads. Runs PBKDF2 once, here.
    pub fn encrypted(settings: &EncryptionSettings) -> CryptoResult<Self> {
        let key = derive_key(settings.secret(), settings.salt())?;
        debug!("derived overflow key");
        Ok(Self { key: Some(key) })
    }

    /// A sealing codec over an already derived key.
    pub fn with_key(key: DerivedKey) -> Self {
        Self { key: Some(key) }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Encodes a payload for the overflow column.
    pub fn encode(&self, value: &Value) -> CryptoResult<String> {
        let text = canonical_json(value)?;
        match &self.key {
            None => Ok(text),
            Some(key) => cipher::seal_text(key, &text),
        }
    }

    /// Decodes an overflow column value.
    pub fn decode(&self, stored: &str) -> Decoded {
        let Some(key) = &self.key else {
            return match serde_json::from_str(stored) {
                Ok(v) => Decoded::Plain(v),
                Err(_) => Decoded::Undecodable(stored.to_string()),
            };
        };

        if let Ok(plaintext) = cipher::open_text(key, stored) {
            if let Ok(v) = serde_json::from_str(&plaintext) {
                return Decoded::Decrypted(v);
            }
        }

        match serde_json::from_str(stored) {
            Ok(v) => Decoded::LegacyPlaintext(v),
            Err(_) => Decoded::Undecodable(stored.to_string()),
        }
    }
}

/// Serializes a value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> CryptoResult<String> {
    Ok(serde_json::to_string(&sorted(value))?)
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
