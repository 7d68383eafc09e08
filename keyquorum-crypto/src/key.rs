//! Session key material and scope-bound subkey derivation.

use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// Size of a derived AES-256 subkey in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the per-record HKDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Raw session key material handed out by a [`crate::SessionKeyProvider`].
///
/// The bytes are wiped on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Zeroizing<Vec<u8>>);

impl SessionKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// An empty key means "no session".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SessionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&[u8]> for SessionKey {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for SessionKey {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

/// Random salt used as the HKDF salt for a single record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Draws a fresh salt from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// A 256-bit AES subkey derived for one record in one scope.
pub struct SubKey(Zeroizing<[u8; KEY_SIZE]>);

impl SubKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Builds the HKDF info string `"<namespace>:<scope>"`.
pub fn scope_info(namespace: &str, scope: &str) -> String {
    format!("{namespace}:{scope}")
}

/// Derives a per-record subkey with HKDF-SHA-256.
///
/// `ikm` is the raw session key, `salt` the record salt and `info` the
/// namespace-qualified scope.
pub fn derive_subkey(ikm: &[u8], salt: &Salt, info: &str) -> CryptoResult<SubKey> {
    if ikm.is_empty() {
        return Err(CryptoError::InvalidInput(
            "session key must not be empty".to_string(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(info.as_bytes(), &mut okm[..])
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SubKey(okm))
}
