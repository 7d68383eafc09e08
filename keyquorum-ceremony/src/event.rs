//! Ceremony wire messages.
//!
//! Every message is one UTF-8 JSON object with a `type` discriminator and
//! camelCase fields. Types this version does not know decode to
//! [`CeremonyEvent::Unknown`] so they can still be audited.

use crate::error::{CeremonyError, CeremonyResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// t-of-n threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub t: u32,
    pub n: u32,
}

impl ThresholdPolicy {
    /// Builds a policy, rejecting `t == 0` and `t > n`.
    pub fn new(t: u32, n: u32) -> CeremonyResult<Self> {
        let policy = Self { t, n };
        if policy.is_valid() {
            Ok(policy)
        } else {
            Err(CeremonyError::InvalidPolicy { t, n })
        }
    }

    /// Single-device policy.
    pub fn single() -> Self {
        Self { t: 1, n: 1 }
    }

    pub fn is_valid(&self) -> bool {
        self.t >= 1 && self.t <= self.n
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-of-{}", self.t, self.n)
    }
}

/// A ceremony message as it travels over the broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CeremonyEvent {
    #[serde(rename = "ceremony.init", rename_all = "camelCase")]
    Init {
        ceremony_id: String,
        key_ref: String,
        #[serde(default)]
        epoch: u64,
        policy: ThresholdPolicy,
    },

    #[serde(rename = "ceremony.join", rename_all = "camelCase")]
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ceremony_id: Option<String>,
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    #[serde(rename = "share.envelope", rename_all = "camelCase")]
    ShareEnvelope {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ceremony_id: Option<String>,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    #[serde(rename = "ceremony.ack", rename_all = "camelCase")]
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ceremony_id: Option<String>,
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    #[serde(rename = "ceremony.finalize", rename_all = "camelCase")]
    Finalize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ceremony_id: Option<String>,
    },

    #[serde(rename = "peer.offline", rename_all = "camelCase")]
    PeerOffline {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    #[serde(rename = "ceremony.error", rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "heartbeat", rename_all = "camelCase")]
    Heartbeat {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        key_ref: String,
        ts: i64,
    },

    #[serde(other)]
    Unknown,
}

impl CeremonyEvent {
    /// The wire `type` string for known variants.
    pub fn kind(&self) -> &'static str {
        match self {
            CeremonyEvent::Init { .. } => "ceremony.init",
            CeremonyEvent::Join { .. } => "ceremony.join",
            CeremonyEvent::ShareEnvelope { .. } => "share.envelope",
            CeremonyEvent::Ack { .. } => "ceremony.ack",
            CeremonyEvent::Finalize { .. } => "ceremony.finalize",
            CeremonyEvent::PeerOffline { .. } => "peer.offline",
            CeremonyEvent::Error { .. } => "ceremony.error",
            CeremonyEvent::Heartbeat { .. } => "heartbeat",
            CeremonyEvent::Unknown => "unknown",
        }
    }

    /// The device that emitted this event, when the event names one.
    ///
    /// `share.envelope` names its recipient, not its sender, so it has no origin.
    pub fn origin_device(&self) -> Option<&str> {
        match self {
            CeremonyEvent::Join { device_id, .. }
            | CeremonyEvent::Ack { device_id, .. }
            | CeremonyEvent::PeerOffline { device_id, .. }
            | CeremonyEvent::Heartbeat { device_id, .. } => Some(device_id),
            CeremonyEvent::Error { device_id, .. } => device_id.as_deref(),
            _ => None,
        }
    }

    /// Encodes the event as a UTF-8 JSON message body.
    pub fn encode(&self) -> CeremonyResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An event together with the local instant it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedEvent {
    /// Wire `type` as received, kept verbatim for unknown types.
    pub kind: String,
    pub event: CeremonyEvent,
    pub received_at: i64,
}

impl ObservedEvent {
    /// Wraps a locally produced event.
    pub fn local(event: CeremonyEvent, received_at: i64) -> Self {
        Self {
            kind: event.kind().to_string(),
            event,
            received_at,
        }
    }

    /// Decodes a raw broadcast message.
    ///
    /// Fails on invalid UTF-8/JSON, on a missing `type`, and on a known type
    /// whose fields do not match.
    pub fn decode(bytes: &[u8], received_at: i64) -> CeremonyResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CeremonyError::MalformedMessage("missing `type` field".to_string()))?
            .to_string();
        let event: CeremonyEvent = serde_json::from_value(value)
            .map_err(|e| CeremonyError::MalformedMessage(format!("{kind}: {e}")))?;

        Ok(Self {
            kind,
            event,
            received_at,
        })
    }
}
