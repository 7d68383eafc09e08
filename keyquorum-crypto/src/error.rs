//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors surfaced by the cipher engine, key providers and encryption factory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// No usable session key is held. Recoverable by re-running the ceremony.
    #[error("session required: no session key available")]
    SessionRequired,

    /// Malformed payload or AEAD authentication failure. The cause is
    /// intentionally not reported.
    #[error("decryption failed")]
    DecryptFailed,

    #[error("unsupported cipher version {version} (algorithm {algorithm})")]
    UnsupportedCipherVersion { version: u8, algorithm: u8 },

    /// Caller passed an argument of the wrong shape (e.g. an empty key).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encryption,
}

impl CryptoError {
    /// Returns true for errors caused by the caller rather than by the data.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, CryptoError::InvalidInput(_))
    }
}
