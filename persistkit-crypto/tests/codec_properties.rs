//! Property-based tests for the overflow codec.
//!
//! These verify the properties stored rows rely on:
//! - Encoding then decoding returns the original payload
//! - A codec with a different key never reports a clean decryption
//! - Plain rows stay readable after encryption is switched on

use std::sync::OnceLock;

use persistkit_crypto::{canonical_json, Decoded, EncryptionSettings, OverflowCodec};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// PBKDF2 at 100k rounds is too slow to run per case.
fn sealing_codec() -> &'static OverflowCodec {
    static CODEC: OnceLock<OverflowCodec> = OnceLock::new();
    CODEC.get_or_init(|| {
        OverflowCodec::encrypted(&EncryptionSettings::new("prop-secret", "prop-salt")).unwrap()
    })
}

fn other_codec() -> &'static OverflowCodec {
    static CODEC: OnceLock<OverflowCodec> = OnceLock::new();
    CODEC.get_or_init(|| {
        OverflowCodec::encrypted(&EncryptionSettings::new("other-secret", "prop-salt")).unwrap()
    })
}

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _\\-é]{0,24}".prop_map(Value::String),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Value> {
    let nested = leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    });
    prop::collection::btree_map("[a-z_]{1,8}", nested, 0..8)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
}

// =============================================================================
// CODEC PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plain_roundtrip(payload in payload_strategy()) {
        let codec = OverflowCodec::plain();
        let text = codec.encode(&payload).unwrap();
        prop_assert_eq!(codec.decode(&text), Decoded::Plain(payload));
    }

    #[test]
    fn sealed_roundtrip(payload in payload_strategy()) {
        let codec = sealing_codec();
        let text = codec.encode(&payload).unwrap();
        prop_assert_eq!(codec.decode(&text), Decoded::Decrypted(payload));
    }

    #[test]
    fn mismatched_key_never_decrypts(payload in payload_strategy()) {
        let text = sealing_codec().encode(&payload).unwrap();
        let decoded = other_codec().decode(&text);
        prop_assert!(decoded.is_fallback());
        prop_assert_eq!(decoded, Decoded::Undecodable(text));
    }

    #[test]
    fn plain_rows_survive_enabling_encryption(payload in payload_strategy()) {
        let text = OverflowCodec::plain().encode(&payload).unwrap();
        prop_assert_eq!(sealing_codec().decode(&text), Decoded::LegacyPlaintext(payload));
    }

    #[test]
    fn canonical_form_ignores_insertion_order(payload in payload_strategy()) {
        let Value::Object(map) = &payload else { unreachable!() };
        let reversed: Map<String, Value> =
            map.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert_eq!(
            canonical_json(&payload).unwrap(),
            canonical_json(&Value::Object(reversed)).unwrap()
        );
    }
}

// ── Fixed scenarios ──────────────────────────────────────────────

#[test]
fn into_value_returns_stored_text_for_undecodable() {
    let decoded = sealing_codec().decode("garbage!");
    assert_eq!(decoded.kind(), "undecodable");
    assert_eq!(decoded.value(), None);
    assert_eq!(decoded.into_value(), json!("garbage!"));
}

#[test]
fn same_settings_decode_each_other() {
    let settings = EncryptionSettings::new("prop-secret", "prop-salt");
    let fresh = OverflowCodec::encrypted(&settings).unwrap();
    let text = sealing_codec().encode(&json!({"id": "x"})).unwrap();
    assert_eq!(fresh.decode(&text), Decoded::Decrypted(json!({"id": "x"})));
    assert!(fresh.is_encrypted());
    assert!(!OverflowCodec::plain().is_encrypted());
}
