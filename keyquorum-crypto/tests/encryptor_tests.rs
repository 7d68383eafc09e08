use keyquorum_crypto::{
    CipherEngine, CryptoError, DataEncryptor, EncryptionFactory, IV_INTERVAL, MutableKeyProvider,
    SCOPE_DATA, SCOPE_REPLICATION, SessionKeyProvider, StaticKeyProvider,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

fn factory(provider: Arc<dyn SessionKeyProvider>) -> EncryptionFactory {
    EncryptionFactory::new(provider, "db-main", SCOPE_DATA)
}

// ── Session gating ──

#[test]
fn locked_provider_yields_session_required() {
    let f = factory(Arc::new(MutableKeyProvider::new()));

    assert_eq!(f.encrypt(b"row"), Err(CryptoError::SessionRequired));
    assert_eq!(f.decrypt(b"anything"), Err(CryptoError::SessionRequired));
}

#[test]
fn empty_static_key_yields_session_required_not_caller_error() {
    // The engine would report InvalidInput for an empty key; SessionRequired
    // shows the factory stopped before reaching it.
    let f = factory(Arc::new(StaticKeyProvider::new("")));
    let err = f.encrypt(b"row").unwrap_err();
    assert_eq!(err, CryptoError::SessionRequired);
    assert!(!err.is_caller_error());
}

#[test]
fn static_provider_roundtrip() {
    let f = factory(Arc::new(StaticKeyProvider::new("fixed-dev-key")));
    let payload = f.encrypt(b"row").unwrap();
    assert_eq!(f.decrypt(&payload).unwrap(), b"row");
}

#[test]
fn factory_output_matches_engine_in_same_scope() {
    let f = factory(Arc::new(StaticKeyProvider::new("k")));
    let payload = f.encrypt(b"row").unwrap();
    assert_eq!(CipherEngine::new(SCOPE_DATA).decrypt(&payload, "k").unwrap(), b"row");
}

// ── Lock / unlock ──

#[test]
fn factory_follows_provider_lock_state() {
    let provider = Arc::new(MutableKeyProvider::new());
    let f = factory(provider.clone());

    assert_eq!(f.encrypt(b"before"), Err(CryptoError::SessionRequired));

    provider.set_session_key("ceremony-output");
    let payload = f.encrypt(b"during").unwrap();
    assert_eq!(f.decrypt(&payload).unwrap(), b"during");

    provider.clear_session("db-main");
    assert_eq!(f.decrypt(&payload), Err(CryptoError::SessionRequired));

    provider.set_session_key(b"ceremony-output".to_vec());
    assert_eq!(f.decrypt(&payload).unwrap(), b"during");
}

#[test]
fn rotated_key_cannot_read_old_records() {
    let provider = Arc::new(MutableKeyProvider::with_key("epoch-1"));
    let f = factory(provider.clone());
    let payload = f.encrypt(b"old").unwrap();

    provider.set_session_key("epoch-2");
    assert_eq!(f.decrypt(&payload), Err(CryptoError::DecryptFailed));
}

#[test]
fn scopes_do_not_share_records() {
    let provider: Arc<dyn SessionKeyProvider> = Arc::new(StaticKeyProvider::new("k"));
    let data = EncryptionFactory::new(provider.clone(), "db-main", SCOPE_DATA);
    let repl = EncryptionFactory::new(provider, "db-main", SCOPE_REPLICATION);

    let payload = data.encrypt(b"row").unwrap();
    assert_eq!(repl.decrypt(&payload), Err(CryptoError::DecryptFailed));
    assert_eq!(repl.scope(), SCOPE_REPLICATION);
    assert_eq!(repl.key_ref(), "db-main");
}

#[test]
fn iv_interval_is_placeholder() {
    let f = factory(Arc::new(StaticKeyProvider::new("k")));
    assert_eq!(f.iv_interval(), IV_INTERVAL);
}

// ── Concurrency ──

#[test]
fn shared_factory_across_threads() {
    let f = Arc::new(factory(Arc::new(StaticKeyProvider::new("shared"))));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let f = f.clone();
            thread::spawn(move || {
                let plaintext = format!("record-{i}");
                let payload = f.encrypt(plaintext.as_bytes()).unwrap();
                (plaintext, payload)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (plaintext, payload) in &results {
        assert_eq!(f.decrypt(payload).unwrap(), plaintext.as_bytes());
    }

    let mut payloads: Vec<_> = results.iter().map(|(_, p)| p.clone()).collect();
    payloads.sort();
    payloads.dedup();
    assert_eq!(payloads.len(), 8);
}

#[test]
fn debug_does_not_leak_key() {
    let f = factory(Arc::new(MutableKeyProvider::with_key("top-secret")));
    let rendered = format!("{f:?}");
    assert!(rendered.contains("db-main"));
    assert!(!rendered.contains("top-secret"));
}
