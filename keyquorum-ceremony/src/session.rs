//! Ceremony session coordinator.
//!
//! A [`CeremonySession`] is the explicit context object for one device taking
//! part in ceremonies for one `key_ref`. It owns the transport handle, feeds
//! every inbound event into a [`CeremonyProjection`], and runs the ranked
//! fallback policy.

use crate::clock::Clock;
use crate::config::CeremonyConfig;
use crate::error::{CeremonyError, CeremonyResult};
use crate::event::{CeremonyEvent, ObservedEvent, ThresholdPolicy};
use crate::fallback::{
    CeremonyStrategy, FallbackPolicy, FallbackTimer, SimulationSeed, simulated_events,
};
use crate::invite::{InviteParams, InviteToken, parse_invite};
use crate::projection::{CeremonyProjection, CeremonyState, DeviceState};
use crate::transport::{
    CeremonyTransport, StatusCallback, SubstrateWatch, TransportHandle, TransportOptions,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{info, warn};

type TimerSlot = Arc<Mutex<Option<FallbackTimer>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the fallback path needs, shared with the timer callback.
struct SessionCore {
    config: CeremonyConfig,
    key_ref: String,
    clock: Arc<dyn Clock>,
    projection: CeremonyProjection,
    fallback: FallbackPolicy,
    strategy: watch::Sender<CeremonyStrategy>,
}

impl SessionCore {
    fn apply_local(&self, event: CeremonyEvent) {
        let observed = ObservedEvent::local(event, self.clock.now_ms());
        self.projection.apply(&observed);
    }

    fn cut_over(&self) {
        let current = *self.strategy.borrow();
        let Some(next) = self.fallback.next_after(current) else {
            warn!(
                "[CEREMONY] No remote device confirmed within {:?}; no fallback ranked after {:?}",
                self.fallback.cutover, current
            );
            return;
        };

        warn!(
            "[CEREMONY] No remote device confirmed within {:?}; cutting over to {:?}",
            self.fallback.cutover, next
        );
        self.strategy.send_replace(next);

        if next == CeremonyStrategy::Simulated {
            self.run_simulation();
        }
    }

    fn run_simulation(&self) {
        let seed = self.simulation_seed();
        info!(
            "[CEREMONY] Simulating ceremony {} for {} device(s)",
            seed.ceremony_id,
            seed.devices.len()
        );
        for event in simulated_events(&seed) {
            self.apply_local(event);
        }
    }

    /// Seeds the simulation from whatever the projection already knows.
    fn simulation_seed(&self) -> SimulationSeed {
        let state = self.projection.snapshot();

        let mut devices: Vec<(String, String)> = state
            .devices
            .iter()
            .filter(|d| d.state.rank().is_some())
            .map(|d| {
                let role = d.role.clone().unwrap_or_else(|| "device".to_string());
                (d.device_id.clone(), role)
            })
            .collect();
        if state.device(&self.config.device_id).is_none() {
            devices.push((self.config.device_id.clone(), self.config.role.clone()));
        }

        SimulationSeed {
            ceremony_id: state
                .ceremony_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            key_ref: state.key_ref.unwrap_or_else(|| self.key_ref.clone()),
            epoch: state.epoch,
            policy: state.policy.unwrap_or_else(ThresholdPolicy::single),
            devices,
        }
    }
}

/// One device's ceremony context.
pub struct CeremonySession {
    core: Arc<SessionCore>,
    transport: TransportHandle,
    timer: TimerSlot,
}

impl CeremonySession {
    /// Starts the transport and, when a fallback is ranked after the real-time
    /// strategy, arms the cutover timer.
    pub fn start(
        config: CeremonyConfig,
        key_ref: impl Into<String>,
        substrates: SubstrateWatch,
        clock: Arc<dyn Clock>,
        fallback: FallbackPolicy,
    ) -> CeremonyResult<Self> {
        Self::start_with_status(config, key_ref, substrates, clock, fallback, None)
    }

    pub fn start_with_status(
        config: CeremonyConfig,
        key_ref: impl Into<String>,
        substrates: SubstrateWatch,
        clock: Arc<dyn Clock>,
        fallback: FallbackPolicy,
        on_status: Option<StatusCallback>,
    ) -> CeremonyResult<Self> {
        config.validate()?;
        let key_ref = key_ref.into();
        let initial = fallback.first().unwrap_or(CeremonyStrategy::Realtime);
        let (strategy, _) = watch::channel(initial);

        let core = Arc::new(SessionCore {
            projection: CeremonyProjection::new(config.event_log_capacity),
            config: config.clone(),
            key_ref: key_ref.clone(),
            clock: Arc::clone(&clock),
            fallback,
            strategy,
        });
        let timer: TimerSlot = Arc::new(Mutex::new(None));

        let on_event = {
            let core = Arc::clone(&core);
            let timer = Arc::clone(&timer);
            Arc::new(move |observed: ObservedEvent| {
                let remote = observed
                    .event
                    .origin_device()
                    .is_some_and(|origin| origin != core.config.device_id);
                if remote {
                    if let Some(pending) = lock(&timer).take() {
                        if pending.cancel() {
                            info!("[CEREMONY] Remote device confirmed; fallback cancelled");
                        }
                    }
                }
                core.projection.apply(&observed);
            })
        };

        // Must be in its slot before the transport delivers its first event.
        if initial == CeremonyStrategy::Realtime && core.fallback.next_after(initial).is_some() {
            let expiring = Arc::clone(&core);
            let armed = FallbackTimer::arm(core.fallback.cutover, move || {
                expiring.cut_over();
            });
            *lock(&timer) = Some(armed);
        }

        let mut options = TransportOptions::new(key_ref, on_event);
        if let Some(on_status) = on_status {
            options = options.with_status(on_status);
        }
        let transport = match CeremonyTransport::new(config, substrates, clock).start(options) {
            Ok(transport) => transport,
            Err(e) => {
                if let Some(pending) = lock(&timer).take() {
                    pending.cancel();
                }
                return Err(e);
            }
        };

        if initial == CeremonyStrategy::Simulated {
            core.run_simulation();
        }

        Ok(Self {
            core,
            transport,
            timer,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.core.config.device_id
    }

    pub fn key_ref(&self) -> &str {
        &self.core.key_ref
    }

    /// Opens a new ceremony as its initiator and returns the invite token.
    pub async fn begin_ceremony(&self, epoch: u64, policy: ThresholdPolicy) -> CeremonyResult<String> {
        let params = InviteParams::new(
            self.core.key_ref.clone(),
            epoch,
            policy,
            self.core.config.invite_ttl(),
        );
        let invite = InviteToken::issue(params, self.core.clock.as_ref())?;
        let token = invite.encode()?;

        info!(
            "[CEREMONY] Starting ceremony {} for {} ({})",
            invite.ceremony_id, invite.key_ref, invite.policy
        );
        self.seed(&invite).await?;
        Ok(token)
    }

    /// Joins the ceremony named by an invite token.
    pub async fn join_with_invite(&self, token: &str) -> CeremonyResult<InviteToken> {
        let invite = parse_invite(token, self.core.clock.as_ref())?;
        if invite.key_ref != self.core.key_ref {
            warn!(
                "[CEREMONY] Invite targets {} but session tracks {}",
                invite.key_ref, self.core.key_ref
            );
        }
        info!("[CEREMONY] Joining ceremony {}", invite.ceremony_id);
        self.seed(&invite).await?;
        Ok(invite)
    }

    async fn seed(&self, invite: &InviteToken) -> CeremonyResult<()> {
        let [init, join] = invite.seed_events(&self.core.config.device_id, &self.core.config.role);
        self.publish(init).await?;
        self.publish(join).await
    }

    /// Applies an event locally and broadcasts it.
    pub async fn publish(&self, event: CeremonyEvent) -> CeremonyResult<()> {
        if !self.transport.is_running() {
            return Err(CeremonyError::ChannelClosed);
        }
        self.core.apply_local(event.clone());
        self.transport.publish(&event).await
    }

    /// Acknowledges the local share.
    pub async fn acknowledge(&self) -> CeremonyResult<()> {
        self.publish(CeremonyEvent::Ack {
            ceremony_id: self.core.projection.snapshot().ceremony_id,
            device_id: self.core.config.device_id.clone(),
            role: Some(self.core.config.role.clone()),
        })
        .await
    }

    pub async fn finalize(&self) -> CeremonyResult<()> {
        let ceremony_id = self.core.projection.snapshot().ceremony_id;
        self.publish(CeremonyEvent::Finalize { ceremony_id }).await
    }

    pub fn snapshot(&self) -> CeremonyState {
        self.core.projection.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CeremonyState> {
        self.core.projection.subscribe()
    }

    pub fn strategy(&self) -> CeremonyStrategy {
        *self.core.strategy.borrow()
    }

    pub fn watch_strategy(&self) -> watch::Receiver<CeremonyStrategy> {
        self.core.strategy.subscribe()
    }

    /// True when this device has reached `ready`.
    pub fn is_locally_ready(&self) -> bool {
        self.snapshot()
            .device(&self.core.config.device_id)
            .is_some_and(|d| d.state == DeviceState::Ready)
    }

    /// Cancels the fallback timer and stops the transport. Idempotent.
    pub async fn stop(&self) {
        if let Some(pending) = lock(&self.timer).take() {
            pending.cancel();
        }
        self.transport.stop().await;
    }
}
