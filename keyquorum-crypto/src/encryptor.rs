//! Encryption factory consumed by the storage layer.
//!
//! Composes a [`CipherEngine`] with a [`SessionKeyProvider`]. Each call fetches
//! the session key anew, so one instance can be shared across concurrent
//! callers and follows lock/unlock of the provider immediately.

use crate::cipher::CipherEngine;
use crate::config::CipherConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::key::SessionKey;
use crate::provider::{KeyRequest, Operation, SessionKeyProvider};
use std::sync::Arc;
use tracing::debug;

/// IV interval reported to storage layers that expect one.
///
/// Nonces are drawn fresh for every record, so there is no interval to honor.
pub const IV_INTERVAL: u64 = 0;

/// Byte-level encrypt/decrypt contract offered to storage backends.
pub trait DataEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, payload: &[u8]) -> CryptoResult<Vec<u8>>;

    /// See [`IV_INTERVAL`].
    fn iv_interval(&self) -> u64 {
        IV_INTERVAL
    }
}

/// Session-gated encryptor for one `(key_ref, scope)` pair.
#[derive(Clone)]
pub struct EncryptionFactory {
    provider: Arc<dyn SessionKeyProvider>,
    key_ref: String,
    engine: CipherEngine,
}

impl EncryptionFactory {
    pub fn new(
        provider: Arc<dyn SessionKeyProvider>,
        key_ref: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self::with_config(provider, key_ref, scope, &CipherConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn SessionKeyProvider>,
        key_ref: impl Into<String>,
        scope: impl Into<String>,
        config: &CipherConfig,
    ) -> Self {
        Self {
            provider,
            key_ref: key_ref.into(),
            engine: CipherEngine::with_config(config, scope),
        }
    }

    pub fn key_ref(&self) -> &str {
        &self.key_ref
    }

    pub fn scope(&self) -> &str {
        self.engine.scope()
    }

    /// Fetches the session key, short-circuiting before any cryptography when
    /// the provider is locked.
    fn session_key(&self, operation: Operation) -> CryptoResult<SessionKey> {
        let request = KeyRequest {
            key_ref: &self.key_ref,
            scope: self.engine.scope(),
            operation,
        };
        match self.provider.get_session_key(&request) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => {
                debug!(
                    key_ref = %self.key_ref,
                    scope = %self.engine.scope(),
                    %operation,
                    "no session key, refusing operation"
                );
                Err(CryptoError::SessionRequired)
            }
        }
    }
}

impl DataEncryptor for EncryptionFactory {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.session_key(Operation::Encrypt)?;
        self.engine.encrypt(plaintext, &key)
    }

    fn decrypt(&self, payload: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.session_key(Operation::Decrypt)?;
        self.engine.decrypt(payload, &key)
    }
}

impl std::fmt::Debug for EncryptionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionFactory")
            .field("key_ref", &self.key_ref)
            .field("scope", &self.engine.scope())
            .finish()
    }
}
