//! AES-256-GCM cipher engine with a versioned, self-describing payload.
//!
//! Wire format:
//!
//! ```text
//! version(1) | algorithm(1) | salt(16) | nonce(12) | ciphertext || tag
//! ```
//!
//! Every record is sealed under its own subkey, derived with HKDF-SHA-256 from
//! the session key, a fresh random salt and the `"<namespace>:<scope>"` info
//! string. The nonce is also drawn fresh for every call.

use crate::config::CipherConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{SALT_SIZE, Salt, derive_subkey, scope_info};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

/// The only payload version this engine reads or writes.
pub const CIPHER_VERSION: u8 = 0x01;

/// Algorithm id for AES-256-GCM.
pub const ALGORITHM_AES_256_GCM: u8 = 0x01;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Fixed header length: version, algorithm, salt and nonce.
pub const HEADER_SIZE: usize = 2 + SALT_SIZE + NONCE_SIZE;

/// Borrowed view over an encoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherPayload<'a> {
    pub version: u8,
    pub algorithm: u8,
    pub salt: Salt,
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the AEAD tag appended.
    pub body: &'a [u8],
}

impl<'a> CipherPayload<'a> {
    /// Splits an encoded payload into its header fields and body.
    ///
    /// The version gate runs before the length check, so a well-formed
    /// payload from a different version reports `UnsupportedCipherVersion`.
    pub fn parse(bytes: &'a [u8]) -> CryptoResult<Self> {
        let (version, algorithm) = match bytes {
            [version, algorithm, ..] => (*version, *algorithm),
            _ => return Err(CryptoError::DecryptFailed),
        };

        if version != CIPHER_VERSION || algorithm != ALGORITHM_AES_256_GCM {
            return Err(CryptoError::UnsupportedCipherVersion { version, algorithm });
        }

        if bytes.len() < HEADER_SIZE + 1 {
            return Err(CryptoError::DecryptFailed);
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[2..2 + SALT_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[2 + SALT_SIZE..HEADER_SIZE]);

        Ok(Self {
            version,
            algorithm,
            salt: Salt::from_bytes(salt),
            nonce,
            body: &bytes[HEADER_SIZE..],
        })
    }

    /// Serializes header and body back into wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.push(self.version);
        out.push(self.algorithm);
        out.extend_from_slice(self.salt.as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(self.body);
        out
    }
}

/// Stateless AEAD engine bound to a single scope.
#[derive(Clone, Debug)]
pub struct CipherEngine {
    scope: String,
    info: String,
}

impl CipherEngine {
    /// Creates an engine for `scope` using the default namespace.
    pub fn new(scope: impl Into<String>) -> Self {
        Self::with_config(&CipherConfig::default(), scope)
    }

    pub fn with_config(config: &CipherConfig, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        let info = scope_info(&config.namespace, &scope);
        Self { scope, info }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Encrypts `plaintext` under a subkey derived from `session_key`.
    ///
    /// `session_key` may be raw bytes or a UTF-8 string. An empty key is a
    /// caller error.
    pub fn encrypt(&self, plaintext: &[u8], session_key: impl AsRef<[u8]>) -> CryptoResult<Vec<u8>> {
        let session_key = non_empty_key(session_key.as_ref())?;

        let salt = Salt::random();
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let subkey = derive_subkey(session_key, &salt, &self.info)?;
        let cipher =
            Aes256Gcm::new_from_slice(subkey.as_bytes()).map_err(|_| CryptoError::KeyDerivation)?;
        let body = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        Ok(CipherPayload {
            version: CIPHER_VERSION,
            algorithm: ALGORITHM_AES_256_GCM,
            salt,
            nonce,
            body: &body,
        }
        .to_bytes())
    }

    /// Decrypts a payload produced by [`CipherEngine::encrypt`] in the same scope.
    pub fn decrypt(&self, payload: &[u8], session_key: impl AsRef<[u8]>) -> CryptoResult<Vec<u8>> {
        let session_key = non_empty_key(session_key.as_ref())?;
        let parsed = CipherPayload::parse(payload)?;

        let subkey = derive_subkey(session_key, &parsed.salt, &self.info)?;
        let cipher =
            Aes256Gcm::new_from_slice(subkey.as_bytes()).map_err(|_| CryptoError::KeyDerivation)?;
        cipher
            .decrypt(Nonce::from_slice(&parsed.nonce), parsed.body)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

fn non_empty_key(key: &[u8]) -> CryptoResult<&[u8]> {
    if key.is_empty() {
        return Err(CryptoError::InvalidInput(
            "session key must be a non-empty byte string".to_string(),
        ));
    }
    Ok(key)
}
