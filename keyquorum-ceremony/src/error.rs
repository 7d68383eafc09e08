//! Ceremony error types.

use thiserror::Error;

/// Result type for ceremony operations.
pub type CeremonyResult<T> = Result<T, CeremonyError>;

/// Errors that can occur while coordinating a ceremony.
#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("invite token rejected: {0}")]
    Invite(#[from] InviteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed ceremony message: {0}")]
    MalformedMessage(String),

    #[error("broadcast substrate error: {0}")]
    Substrate(String),

    #[error("ceremony transport is not running")]
    ChannelClosed,

    #[error("invalid threshold policy: {t}-of-{n}")]
    InvalidPolicy { t: u32, n: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Reasons an invite token cannot be used. Always reported to the caller,
/// never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("token is not valid base64url")]
    Encoding,

    #[error("token payload is malformed: {0}")]
    Malformed(String),

    #[error("token is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported token version {0}")]
    UnsupportedVersion(u32),

    #[error("token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },

    #[error("token carries invalid policy {t}-of-{n}")]
    InvalidPolicy { t: u32, n: u32 },
}
