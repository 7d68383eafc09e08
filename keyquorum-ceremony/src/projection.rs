//! Ceremony status projection.
//!
//! A pure reducer that folds an unordered, possibly duplicated stream of
//! [`ObservedEvent`]s into a [`CeremonyState`] snapshot.
//!
//! Counts are recomputed from the device lattice after every event instead of
//! being incremented. Each device remembers the highest lattice state it has
//! reached separately from an offline/error flag: the flag is lifted only by
//! progress beyond that high-water mark, and a given offline/error event is
//! applied at most once. Events tagged with a ceremony id that has since been
//! replaced by a re-init are audited but otherwise ignored. Together these
//! make redelivery of any already-applied event a no-op.

use crate::event::{CeremonyEvent, ObservedEvent, ThresholdPolicy};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Default capacity of the audit ring buffer.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 200;

/// Device id recorded when a `ceremony.error` names no device.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Per-device progress.
///
/// `Discovered → Joined → ShareReceived → Verified → Ready` form a lattice;
/// `Offline` and `Error` sit outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Discovered,
    Joined,
    ShareReceived,
    Verified,
    Ready,
    Offline,
    Error,
}

impl DeviceState {
    /// Position on the progress lattice, `None` for offline/error.
    pub fn rank(self) -> Option<u8> {
        match self {
            DeviceState::Discovered => Some(0),
            DeviceState::Joined => Some(1),
            DeviceState::ShareReceived => Some(2),
            DeviceState::Verified => Some(3),
            DeviceState::Ready => Some(4),
            DeviceState::Offline | DeviceState::Error => None,
        }
    }

    fn at_least(self, floor: DeviceState) -> bool {
        match (self.rank(), floor.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Discovered => "discovered",
            DeviceState::Joined => "joined",
            DeviceState::ShareReceived => "share_received",
            DeviceState::Verified => "verified",
            DeviceState::Ready => "ready",
            DeviceState::Offline => "offline",
            DeviceState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Ceremony-wide phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    CollectingJoins,
    DistributingShares,
    VerifyingShares,
    Ready,
    Error,
}

/// Coarse status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyStatus {
    Idle,
    Waiting,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    /// First role the device advertised.
    pub role: Option<String>,
    /// Effective state: the flag if set, else `progress`.
    pub state: DeviceState,
    /// Highest lattice state reached in the current ceremony.
    pub progress: DeviceState,
    pub last_seen: i64,
    #[serde(skip)]
    flag: Option<DeviceState>,
    /// Keys of offline/error events already applied.
    #[serde(skip)]
    seen_flags: Vec<String>,
}

impl DeviceRecord {
    fn new(device_id: &str, at: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            role: None,
            state: DeviceState::Discovered,
            progress: DeviceState::Discovered,
            last_seen: at,
            flag: None,
            seen_flags: Vec::new(),
        }
    }

    fn touch(&mut self, role: Option<&str>, at: i64) {
        if self.role.is_none() {
            self.role = role.map(str::to_string);
        }
        self.last_seen = self.last_seen.max(at);
    }

    /// Raises the high-water mark. Only progress never seen before lifts a flag.
    fn raise(&mut self, target: DeviceState) {
        if target.rank() > self.progress.rank() {
            self.progress = target;
            self.flag = None;
        }
        self.refresh();
    }

    /// Sets a flag unless an identical flag event was already applied.
    fn mark(&mut self, flag: DeviceState, key: String) -> bool {
        if self.seen_flags.contains(&key) {
            return false;
        }
        self.seen_flags.push(key);
        self.flag = Some(flag);
        self.refresh();
        true
    }

    fn force_ready(&mut self) {
        if self.flag != Some(DeviceState::Offline) {
            self.progress = DeviceState::Ready;
            self.flag = None;
            self.refresh();
        }
    }

    /// Back to `Joined` at most, keeping offline flags.
    fn reset_progress(&mut self) {
        if self.progress.rank() > DeviceState::Joined.rank() {
            self.progress = DeviceState::Joined;
        }
        if self.flag == Some(DeviceState::Error) {
            self.flag = None;
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        self.state = self.flag.unwrap_or(self.progress);
    }
}

/// Audit entry. Never consulted when computing counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub kind: String,
    pub received_at: i64,
    pub event: CeremonyEvent,
}

/// Materialized ceremony status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CeremonyState {
    pub ceremony_id: Option<String>,
    pub key_ref: Option<String>,
    pub epoch: u64,
    pub policy: Option<ThresholdPolicy>,
    pub phase: Phase,
    pub status: CeremonyStatus,
    pub joined_count: usize,
    pub ack_count: usize,
    pub verified_count: usize,
    /// Sorted by device id.
    pub devices: Vec<DeviceRecord>,
    pub events: VecDeque<AuditEntry>,
    pub last_updated_at: Option<i64>,
    /// Ceremony ids replaced by a re-init.
    pub retired_ceremonies: Vec<String>,
    #[serde(skip)]
    finalized: bool,
    #[serde(skip)]
    event_log_capacity: usize,
}

impl Default for CeremonyState {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl CeremonyState {
    pub fn new(event_log_capacity: usize) -> Self {
        Self {
            ceremony_id: None,
            key_ref: None,
            epoch: 0,
            policy: None,
            phase: Phase::Init,
            status: CeremonyStatus::Idle,
            joined_count: 0,
            ack_count: 0,
            verified_count: 0,
            devices: Vec::new(),
            events: VecDeque::new(),
            last_updated_at: None,
            retired_ceremonies: Vec::new(),
            finalized: false,
            event_log_capacity: event_log_capacity.max(1),
        }
    }

    /// Folds one event into the state.
    pub fn apply(mut self, observed: &ObservedEvent) -> Self {
        self.reduce(observed);
        self
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.index_of(device_id).ok().map(|i| &self.devices[i])
    }

    /// True once at least `policy.t` devices have acknowledged.
    pub fn quorum_reached(&self) -> bool {
        self.policy
            .is_some_and(|p| self.ack_count >= p.t as usize)
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub(crate) fn reduce(&mut self, observed: &ObservedEvent) {
        let at = observed.received_at;

        match &observed.event {
            CeremonyEvent::Init {
                ceremony_id,
                key_ref,
                epoch,
                policy,
            } => self.on_init(ceremony_id, key_ref, *epoch, *policy),
            CeremonyEvent::Join {
                ceremony_id,
                device_id,
                role,
            } => {
                if !self.is_stale(ceremony_id.as_deref(), &observed.kind) {
                    self.progress(device_id, role.as_deref(), DeviceState::Joined, at);
                }
            }
            CeremonyEvent::ShareEnvelope {
                ceremony_id,
                to,
                role,
            } => {
                if !self.is_stale(ceremony_id.as_deref(), &observed.kind) {
                    self.advance(Phase::DistributingShares);
                    self.progress(to, role.as_deref(), DeviceState::ShareReceived, at);
                }
            }
            CeremonyEvent::Ack {
                ceremony_id,
                device_id,
                role,
            } => {
                if !self.is_stale(ceremony_id.as_deref(), &observed.kind) {
                    self.advance(Phase::VerifyingShares);
                    self.progress(device_id, role.as_deref(), DeviceState::Verified, at);
                }
            }
            CeremonyEvent::Finalize { ceremony_id } => {
                if !self.is_stale(ceremony_id.as_deref(), &observed.kind) {
                    self.on_finalize();
                }
            }
            CeremonyEvent::PeerOffline { device_id, role } => {
                self.flag(device_id, role.as_deref(), DeviceState::Offline, observed.kind.clone(), at);
            }
            CeremonyEvent::Error {
                device_id,
                role,
                reason,
            } => {
                let device_id = device_id.as_deref().unwrap_or(UNKNOWN_DEVICE);
                let key = format!("{}:{}", observed.kind, reason.as_deref().unwrap_or_default());
                if self.flag(device_id, role.as_deref(), DeviceState::Error, key, at) {
                    self.phase = Phase::Error;
                    self.status = CeremonyStatus::Error;
                }
            }
            CeremonyEvent::Heartbeat { device_id, .. } => {
                if let Ok(i) = self.index_of(device_id) {
                    let device = &mut self.devices[i];
                    device.last_seen = device.last_seen.max(at);
                }
            }
            CeremonyEvent::Unknown => {
                debug!(kind = %observed.kind, "unrecognized ceremony event kept for audit only");
            }
        }

        self.record(observed);
        self.recount();
        self.last_updated_at = Some(self.last_updated_at.map_or(at, |prev| prev.max(at)));
    }

    fn on_init(&mut self, ceremony_id: &str, key_ref: &str, epoch: u64, policy: ThresholdPolicy) {
        if !policy.is_valid() {
            warn!(%ceremony_id, %policy, "ignoring ceremony.init with invalid policy");
            return;
        }

        if self.is_stale(Some(ceremony_id), "ceremony.init") {
            return;
        }

        let current = self.ceremony_id.clone();
        match current {
            Some(current) if current == ceremony_id => {}
            Some(previous) => {
                // Re-initialization: new ceremony for the same projection.
                // Devices are retained, progress is not.
                self.retired_ceremonies.push(previous);
                self.set_identity(ceremony_id, key_ref, epoch, policy);
                self.phase = Phase::CollectingJoins;
                self.status = CeremonyStatus::Waiting;
                self.finalized = false;
                for device in &mut self.devices {
                    device.reset_progress();
                }
            }
            None => {
                // First init may arrive after later-phase events.
                self.set_identity(ceremony_id, key_ref, epoch, policy);
                self.advance(Phase::CollectingJoins);
                if self.status == CeremonyStatus::Idle {
                    self.status = CeremonyStatus::Waiting;
                }
            }
        }
    }

    fn set_identity(&mut self, ceremony_id: &str, key_ref: &str, epoch: u64, policy: ThresholdPolicy) {
        self.ceremony_id = Some(ceremony_id.to_string());
        self.key_ref = Some(key_ref.to_string());
        self.epoch = epoch;
        self.policy = Some(policy);
    }

    fn on_finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.phase = Phase::Ready;
        self.status = CeremonyStatus::Ready;
        for device in &mut self.devices {
            device.force_ready();
        }
    }

    /// True for events addressed to a ceremony a re-init replaced.
    fn is_stale(&self, ceremony_id: Option<&str>, kind: &str) -> bool {
        let stale = ceremony_id.is_some_and(|id| self.retired_ceremonies.iter().any(|r| r == id));
        if stale {
            debug!(%kind, ceremony_id = ?ceremony_id, "ignoring event for a replaced ceremony");
        }
        stale
    }

    /// Moves the phase forward; never backward and never out of `Error`.
    fn advance(&mut self, target: Phase) {
        if self.phase != Phase::Error && target > self.phase {
            self.phase = target;
        }
    }

    fn index_of(&self, device_id: &str) -> Result<usize, usize> {
        self.devices
            .binary_search_by(|d| d.device_id.as_str().cmp(device_id))
    }

    fn entry(&mut self, device_id: &str, at: i64) -> &mut DeviceRecord {
        let i = match self.index_of(device_id) {
            Ok(i) => i,
            Err(i) => {
                self.devices.insert(i, DeviceRecord::new(device_id, at));
                i
            }
        };
        &mut self.devices[i]
    }

    fn progress(&mut self, device_id: &str, role: Option<&str>, target: DeviceState, at: i64) {
        let device = self.entry(device_id, at);
        device.touch(role, at);
        device.raise(target);
    }

    /// Returns `false` when this exact flag event was already applied.
    fn flag(
        &mut self,
        device_id: &str,
        role: Option<&str>,
        flag: DeviceState,
        key: String,
        at: i64,
    ) -> bool {
        let device = self.entry(device_id, at);
        device.touch(role, at);
        device.mark(flag, key)
    }

    fn record(&mut self, observed: &ObservedEvent) {
        self.events.push_back(AuditEntry {
            kind: observed.kind.clone(),
            received_at: observed.received_at,
            event: observed.event.clone(),
        });
        while self.events.len() > self.event_log_capacity {
            self.events.pop_front();
        }
    }

    fn recount(&mut self) {
        let count = |floor: DeviceState| {
            self.devices
                .iter()
                .filter(|d| d.state.at_least(floor))
                .count()
        };
        self.joined_count = count(DeviceState::Joined);
        self.ack_count = count(DeviceState::Verified);
        self.verified_count = count(DeviceState::Ready);
    }
}

/// Owns one [`CeremonyState`] and publishes every post-event snapshot on a
/// single watch channel, so observers never see a half-applied event.
#[derive(Debug)]
pub struct CeremonyProjection {
    tx: watch::Sender<CeremonyState>,
}

impl CeremonyProjection {
    pub fn new(event_log_capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(CeremonyState::new(event_log_capacity));
        Self { tx }
    }

    /// Applies an event and notifies observers.
    pub fn apply(&self, observed: &ObservedEvent) {
        self.tx.send_modify(|state| state.reduce(observed));
    }

    pub fn snapshot(&self) -> CeremonyState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CeremonyState> {
        self.tx.subscribe()
    }
}

impl Default for CeremonyProjection {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}
