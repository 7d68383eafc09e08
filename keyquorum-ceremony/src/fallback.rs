//! Ranked fallback between ceremony strategies.
//!
//! The real-time strategy runs first. If no remote device confirms within
//! the cutover window, the next ranked strategy takes over. The window is a
//! [`FallbackTimer`] that is cancelled as soon as real connectivity shows up.

use crate::event::{CeremonyEvent, ThresholdPolicy};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a ceremony reaches readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyStrategy {
    /// Live events over the broadcast substrate.
    Realtime,
    /// Locally generated events for the known device set.
    Simulated,
}

/// Ordered list of strategies with a timeout-driven cutover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub ranked: Vec<CeremonyStrategy>,
    pub cutover: Duration,
}

impl FallbackPolicy {
    pub fn new(ranked: Vec<CeremonyStrategy>, cutover: Duration) -> Self {
        Self { ranked, cutover }
    }

    /// Realtime only, never cuts over.
    pub fn realtime_only(cutover: Duration) -> Self {
        Self::new(vec![CeremonyStrategy::Realtime], cutover)
    }

    pub fn first(&self) -> Option<CeremonyStrategy> {
        self.ranked.first().copied()
    }

    /// The strategy ranked after `current`, if any.
    pub fn next_after(&self, current: CeremonyStrategy) -> Option<CeremonyStrategy> {
        let position = self.ranked.iter().position(|s| *s == current)?;
        self.ranked.get(position + 1).copied()
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(
            vec![CeremonyStrategy::Realtime, CeremonyStrategy::Simulated],
            Duration::from_millis(15_000),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed,
    Fired,
    Cancelled,
}

/// A cancellable one-shot scheduled task.
///
/// Exactly one of "fired" and "cancelled" wins; the callback never runs after
/// [`cancel`](Self::cancel) returns `true`.
#[derive(Debug)]
pub struct FallbackTimer {
    state: Arc<Mutex<TimerState>>,
    task: JoinHandle<()>,
}

impl FallbackTimer {
    /// Schedules `on_expire` after `after`. Must be called inside a tokio runtime.
    pub fn arm<F>(after: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(Mutex::new(TimerState::Armed));
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let fire = {
                let mut state = task_state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if *state == TimerState::Armed {
                    *state = TimerState::Fired;
                    true
                } else {
                    false
                }
            };
            if fire {
                debug!("fallback timer fired after {:?}", after);
                on_expire();
            }
        });
        Self { state, task }
    }

    /// Cancels the timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != TimerState::Armed {
            return false;
        }
        *state = TimerState::Cancelled;
        self.task.abort();
        true
    }

    pub fn is_armed(&self) -> bool {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            == TimerState::Armed
    }

    pub fn has_fired(&self) -> bool {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            == TimerState::Fired
    }
}

impl Drop for FallbackTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// What the simulated strategy needs to run a ceremony locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSeed {
    pub ceremony_id: String,
    pub key_ref: String,
    pub epoch: u64,
    pub policy: ThresholdPolicy,
    /// `(device_id, role)` pairs.
    pub devices: Vec<(String, String)>,
}

/// The canned event sequence of a successful ceremony for `seed.devices`.
pub fn simulated_events(seed: &SimulationSeed) -> Vec<CeremonyEvent> {
    let mut events = Vec::with_capacity(2 + seed.devices.len() * 3);
    events.push(CeremonyEvent::Init {
        ceremony_id: seed.ceremony_id.clone(),
        key_ref: seed.key_ref.clone(),
        epoch: seed.epoch,
        policy: seed.policy,
    });
    for (device_id, role) in &seed.devices {
        events.push(CeremonyEvent::Join {
            ceremony_id: Some(seed.ceremony_id.clone()),
            device_id: device_id.clone(),
            role: Some(role.clone()),
        });
    }
    for (device_id, role) in &seed.devices {
        events.push(CeremonyEvent::ShareEnvelope {
            ceremony_id: Some(seed.ceremony_id.clone()),
            to: device_id.clone(),
            role: Some(role.clone()),
        });
    }
    for (device_id, role) in &seed.devices {
        events.push(CeremonyEvent::Ack {
            ceremony_id: Some(seed.ceremony_id.clone()),
            device_id: device_id.clone(),
            role: Some(role.clone()),
        });
    }
    events.push(CeremonyEvent::Finalize {
        ceremony_id: Some(seed.ceremony_id.clone()),
    });
    events
}
