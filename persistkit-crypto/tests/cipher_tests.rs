use persistkit_crypto::{
    generate_random_key, open, open_text, seal, seal_text, Sealed, NONCE_SIZE, TAG_SIZE,
};

// ── seal / open ──────────────────────────────────────────────────

#[test]
fn seal_open_roundtrip() {
    let key = generate_random_key();
    let sealed = seal(&key, b"{\"id\":\"a\"}").unwrap();
    assert_eq!(open(&key, &sealed).unwrap(), b"{\"id\":\"a\"}");
}

#[test]
fn seal_empty_plaintext() {
    let key = generate_random_key();
    let sealed = seal(&key, b"").unwrap();
    assert_eq!(sealed.ciphertext.len(), TAG_SIZE);
    assert_eq!(open(&key, &sealed).unwrap(), b"");
}

#[test]
fn wrong_key_is_rejected() {
    let sealed = seal(&generate_random_key(), b"payload").unwrap();
    assert!(open(&generate_random_key(), &sealed).is_err());
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let key = generate_random_key();
    let mut sealed = seal(&key, b"payload").unwrap();
    sealed.ciphertext[0] ^= 0xFF;
    assert!(open(&key, &sealed).is_err());
}

#[test]
fn nonces_are_fresh() {
    let key = generate_random_key();
    let a = seal(&key, b"same").unwrap();
    let b = seal(&key, b"same").unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

// ── Column text form ─────────────────────────────────────────────

#[test]
fn text_form_roundtrip() {
    let key = generate_random_key();
    let sealed = seal(&key, b"abc").unwrap();
    let parsed = Sealed::from_text(&sealed.to_text()).unwrap();
    assert_eq!(parsed, sealed);
    assert_eq!(parsed.len(), NONCE_SIZE + 3 + TAG_SIZE);
}

#[test]
fn text_form_is_url_safe() {
    let key = generate_random_key();
    for _ in 0..32 {
        let text = seal_text(&key, "a longer payload to get varied base64 output ~~~").unwrap();
        assert!(!text.contains('+') && !text.contains('/'), "{text}");
    }
}

#[test]
fn open_text_roundtrip() {
    let key = generate_random_key();
    let text = seal_text(&key, "héllo").unwrap();
    assert_eq!(open_text(&key, &text).unwrap(), "héllo");
}

#[test]
fn invalid_base64_is_rejected() {
    let err = Sealed::from_text("{not base64}").unwrap_err();
    assert!(err.to_string().contains("invalid base64"));
}

#[test]
fn short_payload_is_rejected() {
    use base64::{engine::general_purpose::URL_SAFE, Engine};
    let text = URL_SAFE.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
    let err = Sealed::from_text(&text).unwrap_err();
    assert!(err.to_string().contains("too short"));
}
