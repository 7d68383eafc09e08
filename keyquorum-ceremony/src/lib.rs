//! Multi-device ceremony coordination.
//!
//! Devices agree on readiness under a t-of-n policy by exchanging small JSON
//! events over an unreliable broadcast topic:
//!
//! - [`CeremonyEvent`] is the wire vocabulary.
//! - [`CeremonyState`] is the order- and duplicate-tolerant projection of
//!   everything observed so far.
//! - [`CeremonyTransport`] moves events over a [`BroadcastSubstrate`] and
//!   emits heartbeats.
//! - Invite tokens ([`create_invite`], [`parse_invite`]) bootstrap joiners.
//! - [`CeremonySession`] ties these together with a ranked
//!   [`FallbackPolicy`].
//!
//! The resulting session key is handed to the encryption layer by the caller;
//! this crate never touches key material.

mod clock;
mod config;
mod error;
mod event;
mod fallback;
mod invite;
mod logging;
mod projection;
mod session;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CeremonyConfig;
pub use error::{CeremonyError, CeremonyResult, InviteError};
pub use event::{CeremonyEvent, ObservedEvent, ThresholdPolicy};
pub use fallback::{
    CeremonyStrategy, FallbackPolicy, FallbackTimer, SimulationSeed, simulated_events,
};
pub use invite::{INVITE_VERSION, InviteParams, InviteToken, create_invite, parse_invite};
pub use logging::init_logging;
pub use projection::{
    AuditEntry, CeremonyProjection, CeremonyState, CeremonyStatus, DEFAULT_EVENT_LOG_CAPACITY,
    DeviceRecord, DeviceState, Phase, UNKNOWN_DEVICE,
};
pub use session::CeremonySession;
pub use transport::{
    BroadcastSubstrate, CeremonyTransport, EventCallback, SharedSubstrate, StatusCallback,
    SubstrateWatch, TransportHandle, TransportOptions, TransportStatus,
};
