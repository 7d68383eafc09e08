//! Ceremony configuration.

use crate::error::{CeremonyError, CeremonyResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the ceremony transport and session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CeremonyConfig {
    /// Broadcast topic all ceremony messages are published on.
    pub topic: String,

    /// Stable identifier of this device.
    pub device_id: String,

    /// Role advertised by this device (e.g. "desktop", "phone").
    pub role: String,

    /// Interval between liveness heartbeats (milliseconds).
    pub heartbeat_interval_ms: u64,

    /// How long the real-time strategy may go without hearing from a remote
    /// device before the next ranked strategy takes over (milliseconds).
    pub fallback_timeout_ms: u64,

    /// Capacity of the projection's audit ring buffer.
    pub event_log_capacity: usize,

    /// Lifetime of newly created invite tokens (milliseconds).
    pub invite_ttl_ms: u64,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            topic: "keyquorum-ceremony".to_string(),
            device_id: uuid::Uuid::new_v4().to_string(),
            role: "device".to_string(),
            heartbeat_interval_ms: 6_000,
            fallback_timeout_ms: 15_000,
            event_log_capacity: 200,
            invite_ttl_ms: 10 * 60 * 1000,
        }
    }
}

impl CeremonyConfig {
    /// Creates a default config for a named device.
    pub fn for_device(device_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn invite_ttl(&self) -> Duration {
        Duration::from_millis(self.invite_ttl_ms)
    }

    /// Rejects values the transport and projection cannot run with.
    pub fn validate(&self) -> CeremonyResult<()> {
        if self.topic.trim().is_empty() {
            return Err(CeremonyError::Config("topic must not be empty".to_string()));
        }
        if self.device_id.trim().is_empty() {
            return Err(CeremonyError::Config("device_id must not be empty".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(CeremonyError::Config(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.event_log_capacity == 0 {
            return Err(CeremonyError::Config(
                "event_log_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
