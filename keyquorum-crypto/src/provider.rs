//! Session key providers.
//!
//! A provider is the only owner of raw session key material. The cipher engine
//! and the encryption factory read from it but never write to it.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SessionKey;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The operation a session key is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Encrypt => write!(f, "encrypt"),
            Operation::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// Context passed to [`SessionKeyProvider::get_session_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRequest<'a> {
    pub key_ref: &'a str,
    pub scope: &'a str,
    pub operation: Operation,
}

/// Capability that supplies or withholds the raw session key.
pub trait SessionKeyProvider: Send + Sync {
    /// Returns the current key, or `None` while locked. Never fails.
    fn get_session_key(&self, request: &KeyRequest<'_>) -> Option<SessionKey>;

    /// Fails with [`CryptoError::SessionRequired`] unless a non-empty key is held.
    fn ensure_session(&self, key_ref: &str, scope: &str) -> CryptoResult<()>;

    /// Discards held key material. Calling it on a locked provider is a no-op.
    fn clear_session(&self, key_ref: &str);
}

/// Provider with a fixed key for environments without a live ceremony.
pub struct StaticKeyProvider {
    key: SessionKey,
}

impl StaticKeyProvider {
    pub fn new(key: impl Into<SessionKey>) -> Self {
        Self { key: key.into() }
    }
}

impl SessionKeyProvider for StaticKeyProvider {
    fn get_session_key(&self, _request: &KeyRequest<'_>) -> Option<SessionKey> {
        if self.key.is_empty() {
            None
        } else {
            Some(self.key.clone())
        }
    }

    fn ensure_session(&self, key_ref: &str, _scope: &str) -> CryptoResult<()> {
        if self.key.is_empty() {
            debug!("static provider for {key_ref} holds an empty key");
            return Err(CryptoError::SessionRequired);
        }
        Ok(())
    }

    fn clear_session(&self, key_ref: &str) {
        // The key is immutable for the process lifetime.
        debug!("ignoring clear_session for {key_ref} on static provider");
    }
}

/// Provider whose key is set after a ceremony completes and cleared on lock.
#[derive(Default)]
pub struct MutableKeyProvider {
    key: RwLock<Option<SessionKey>>,
}

impl MutableKeyProvider {
    /// Creates a locked provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that already holds `key`.
    pub fn with_key(key: impl Into<SessionKey>) -> Self {
        Self {
            key: RwLock::new(Some(key.into())),
        }
    }

    /// Replaces the held key. Accepts byte or string form.
    pub fn set_session_key(&self, key: impl Into<SessionKey>) {
        let key = key.into();
        debug!(len = key.len(), "session key set");
        *self.write() = Some(key);
    }

    /// Returns true if a non-empty key is held.
    pub fn has_session(&self) -> bool {
        self.read().as_ref().is_some_and(|k| !k.is_empty())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SessionKey>> {
        self.key.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<SessionKey>> {
        self.key.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionKeyProvider for MutableKeyProvider {
    fn get_session_key(&self, _request: &KeyRequest<'_>) -> Option<SessionKey> {
        self.read().as_ref().filter(|k| !k.is_empty()).cloned()
    }

    fn ensure_session(&self, key_ref: &str, scope: &str) -> CryptoResult<()> {
        if self.has_session() {
            Ok(())
        } else {
            debug!("no session for {key_ref}/{scope}");
            Err(CryptoError::SessionRequired)
        }
    }

    fn clear_session(&self, key_ref: &str) {
        if self.write().take().is_some() {
            debug!("session cleared for {key_ref}");
        }
    }
}

impl fmt::Debug for MutableKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableKeyProvider")
            .field("has_session", &self.has_session())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> KeyRequest<'static> {
        KeyRequest {
            key_ref: "db-1",
            scope: "data",
            operation: Operation::Encrypt,
        }
    }

    #[test]
    fn static_provider_returns_fixed_key() {
        let provider = StaticKeyProvider::new("fixed");
        assert_eq!(provider.get_session_key(&request()), Some(SessionKey::from("fixed")));
        assert!(provider.ensure_session("db-1", "data").is_ok());

        provider.clear_session("db-1");
        assert!(provider.get_session_key(&request()).is_some());
    }

    #[test]
    fn static_provider_with_empty_key_is_locked() {
        let provider = StaticKeyProvider::new("");
        assert_eq!(provider.get_session_key(&request()), None);
        assert_eq!(
            provider.ensure_session("db-1", "data"),
            Err(CryptoError::SessionRequired)
        );
    }

    #[test]
    fn mutable_provider_lifecycle() {
        let provider = MutableKeyProvider::new();
        assert!(!provider.has_session());
        assert_eq!(
            provider.ensure_session("db-1", "data"),
            Err(CryptoError::SessionRequired)
        );

        provider.set_session_key(vec![1u8, 2, 3]);
        assert!(provider.has_session());
        assert!(provider.ensure_session("db-1", "data").is_ok());
        assert_eq!(
            provider.get_session_key(&request()).unwrap().as_bytes(),
            &[1, 2, 3]
        );

        provider.set_session_key("replacement");
        assert_eq!(
            provider.get_session_key(&request()),
            Some(SessionKey::from("replacement"))
        );

        provider.clear_session("db-1");
        provider.clear_session("db-1");
        assert!(!provider.has_session());
        assert_eq!(provider.get_session_key(&request()), None);
    }

    #[test]
    fn mutable_provider_treats_empty_key_as_locked() {
        let provider = MutableKeyProvider::with_key("");
        assert!(!provider.has_session());
        assert_eq!(provider.get_session_key(&request()), None);
    }

    #[test]
    fn operation_display() {
        assert_eq!(Operation::Encrypt.to_string(), "encrypt");
        assert_eq!(Operation::Decrypt.to_string(), "decrypt");
    }
}
