//! Session-keyed encryption layer for keyquorum.
//!
//! Provides per-record authenticated encryption using:
//! - HKDF-SHA-256 to derive a per-record, per-scope AES subkey
//! - AES-256-GCM with a fresh random nonce for every record
//! - Pluggable session key providers, with zeroization of held key material
//!
//! # Architecture
//!
//! No static password is involved. The raw session key is obtained on demand
//! from a [`SessionKeyProvider`], which is populated once a device ceremony
//! reaches the ready state and cleared again on lock.
//!
//! 1. **Cipher engine**: stateless; turns a session key and plaintext into a
//!    versioned payload (`version | algorithm | salt | nonce | ciphertext+tag`).
//!
//! 2. **Encryption factory**: binds an engine to a provider, a key reference
//!    and a scope, and refuses to run without a session.

mod cipher;
mod config;
mod encryptor;
mod error;
mod key;
mod provider;

pub use cipher::{
    ALGORITHM_AES_256_GCM, CIPHER_VERSION, CipherEngine, CipherPayload, HEADER_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use config::{CipherConfig, DEFAULT_NAMESPACE, SCOPE_DATA, SCOPE_REPLICATION};
pub use encryptor::{DataEncryptor, EncryptionFactory, IV_INTERVAL};
pub use error::{CryptoError, CryptoResult};
pub use key::{KEY_SIZE, SALT_SIZE, Salt, SessionKey, SubKey, derive_subkey, scope_info};
pub use provider::{KeyRequest, MutableKeyProvider, Operation, SessionKeyProvider, StaticKeyProvider};
