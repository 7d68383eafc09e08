//! Invite token codec.
//!
//! A token is the base64url (unpadded) encoding of a JSON envelope
//! `{v, ceremonyId, keyRef, epoch, policy: {t, n}, exp}`. Tokens travel out of
//! band and are checked for expiry only when parsed.
//!
//! Tokens carry no replay protection: a captured token stays usable until
//! `exp`.

use crate::clock::Clock;
use crate::error::{CeremonyResult, InviteError};
use crate::event::{CeremonyEvent, ThresholdPolicy};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Envelope version this codec writes and accepts.
pub const INVITE_VERSION: u32 = 1;

/// A decoded invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteToken {
    pub v: u32,
    pub ceremony_id: String,
    pub key_ref: String,
    pub epoch: u64,
    pub policy: ThresholdPolicy,
    /// Expiry, Unix milliseconds.
    pub exp: i64,
}

/// Input to [`create_invite`].
#[derive(Debug, Clone)]
pub struct InviteParams {
    pub key_ref: String,
    pub epoch: u64,
    pub policy: ThresholdPolicy,
    pub ttl: Duration,
    /// Generated when absent.
    pub ceremony_id: Option<String>,
}

impl InviteParams {
    pub fn new(key_ref: impl Into<String>, epoch: u64, policy: ThresholdPolicy, ttl: Duration) -> Self {
        Self {
            key_ref: key_ref.into(),
            epoch,
            policy,
            ttl,
            ceremony_id: None,
        }
    }

    pub fn with_ceremony_id(mut self, ceremony_id: impl Into<String>) -> Self {
        self.ceremony_id = Some(ceremony_id.into());
        self
    }
}

/// Lenient shape used for parsing so missing fields get precise errors.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInvite {
    v: Option<u32>,
    ceremony_id: Option<String>,
    key_ref: Option<String>,
    #[serde(default)]
    epoch: u64,
    policy: Option<ThresholdPolicy>,
    exp: Option<i64>,
}

/// Builds and encodes an invite expiring `params.ttl` from now.
///
/// Bad parameters surface as [`CeremonyError::Invite`](crate::CeremonyError::Invite).
pub fn create_invite(params: InviteParams, clock: &dyn Clock) -> CeremonyResult<String> {
    let token = InviteToken::issue(params, clock)?;
    token.encode()
}

/// Decodes and validates an invite.
pub fn parse_invite(token: &str, clock: &dyn Clock) -> Result<InviteToken, InviteError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim().trim_end_matches('='))
        .map_err(|_| InviteError::Encoding)?;
    let raw: RawInvite =
        serde_json::from_slice(&bytes).map_err(|e| InviteError::Malformed(e.to_string()))?;

    let ceremony_id = raw.ceremony_id.ok_or(InviteError::MissingField("ceremonyId"))?;
    let key_ref = raw.key_ref.ok_or(InviteError::MissingField("keyRef"))?;
    let exp = raw.exp.ok_or(InviteError::MissingField("exp"))?;

    let v = raw.v.unwrap_or(INVITE_VERSION);
    if v != INVITE_VERSION {
        return Err(InviteError::UnsupportedVersion(v));
    }

    let policy = raw.policy.unwrap_or_else(ThresholdPolicy::single);
    if !policy.is_valid() {
        return Err(InviteError::InvalidPolicy {
            t: policy.t,
            n: policy.n,
        });
    }

    let now = clock.now_ms();
    if now > exp {
        return Err(InviteError::Expired { exp, now });
    }

    Ok(InviteToken {
        v,
        ceremony_id,
        key_ref,
        epoch: raw.epoch,
        policy,
        exp,
    })
}

impl InviteToken {
    /// Creates a fresh envelope without encoding it.
    pub fn issue(params: InviteParams, clock: &dyn Clock) -> Result<Self, InviteError> {
        if !params.policy.is_valid() {
            return Err(InviteError::InvalidPolicy {
                t: params.policy.t,
                n: params.policy.n,
            });
        }
        let ttl_ms = i64::try_from(params.ttl.as_millis()).unwrap_or(i64::MAX);

        Ok(Self {
            v: INVITE_VERSION,
            ceremony_id: params
                .ceremony_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            key_ref: params.key_ref,
            epoch: params.epoch,
            policy: params.policy,
            exp: clock.now_ms().saturating_add(ttl_ms),
        })
    }

    pub fn encode(&self) -> CeremonyResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Milliseconds until expiry, zero once expired.
    pub fn remaining_ms(&self, now: i64) -> i64 {
        self.exp.saturating_sub(now).max(0)
    }

    /// The `init` + `join` pair a device applies before it starts listening.
    pub fn seed_events(&self, device_id: &str, role: &str) -> [CeremonyEvent; 2] {
        [
            CeremonyEvent::Init {
                ceremony_id: self.ceremony_id.clone(),
                key_ref: self.key_ref.clone(),
                epoch: self.epoch,
                policy: self.policy,
            },
            CeremonyEvent::Join {
                ceremony_id: Some(self.ceremony_id.clone()),
                device_id: device_id.to_string(),
                role: Some(role.to_string()),
            },
        ]
    }
}
