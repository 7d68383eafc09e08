//! Ceremony transport.
//!
//! Delivers ceremony events over one broadcast topic and publishes liveness
//! heartbeats. The transport owns all substrate I/O in a single background
//! task; callers talk to it through a [`TransportHandle`].
//!
//! The substrate is supplied through a watch channel. Whenever the watched
//! value changes (reconnect, handoff) the task unsubscribes from the old
//! substrate and subscribes on the new one.

use crate::clock::Clock;
use crate::config::CeremonyConfig;
use crate::error::{CeremonyError, CeremonyResult};
use crate::event::{CeremonyEvent, ObservedEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

/// A best-effort publish/subscribe medium (relay socket, local bus, BLE mesh).
///
/// Delivery may be duplicated, reordered, or lost.
#[async_trait]
pub trait BroadcastSubstrate: Send + Sync {
    /// Short name used in logs and status reports.
    fn name(&self) -> &str;

    /// Subscribes to a topic. The returned channel yields raw message bodies
    /// and closes when the subscription ends.
    async fn subscribe(&self, topic: &str) -> CeremonyResult<mpsc::Receiver<Vec<u8>>>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CeremonyResult<()>;

    async fn unsubscribe(&self, topic: &str) -> CeremonyResult<()>;
}

pub type SharedSubstrate = Arc<dyn BroadcastSubstrate>;

/// The currently available substrate, if any.
pub type SubstrateWatch = watch::Receiver<Option<SharedSubstrate>>;

/// Transport lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    WaitingForSubstrate,
    Subscribed { substrate: String },
    SubscribeFailed { reason: String },
    Stopped,
}

/// Receives every decoded inbound event on the transport task.
///
/// Runs while the delivery gate is held, so [`TransportHandle::stop`] waits
/// for it to return. It must not block on the handle that owns it (for
/// example `block_on(handle.stop())`); [`TransportHandle::is_running`] is
/// safe to call.
pub type EventCallback = Arc<dyn Fn(ObservedEvent) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(TransportStatus) + Send + Sync>;

/// Per-start options.
#[derive(Clone)]
pub struct TransportOptions {
    /// Key the heartbeats advertise.
    pub key_ref: String,
    /// See [`EventCallback`] for what it may not do.
    pub on_event: EventCallback,
    pub on_status: Option<StatusCallback>,
}

impl TransportOptions {
    pub fn new(key_ref: impl Into<String>, on_event: EventCallback) -> Self {
        Self {
            key_ref: key_ref.into(),
            on_event,
            on_status: None,
        }
    }

    pub fn with_status(mut self, on_status: StatusCallback) -> Self {
        self.on_status = Some(on_status);
        self
    }
}

enum TransportCommand {
    Publish(Vec<u8>),
}

/// Factory for running transports.
pub struct CeremonyTransport {
    config: CeremonyConfig,
    substrates: SubstrateWatch,
    clock: Arc<dyn Clock>,
}

impl CeremonyTransport {
    pub fn new(config: CeremonyConfig, substrates: SubstrateWatch, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            substrates,
            clock,
        }
    }

    /// Spawns the transport task. Must be called inside a tokio runtime.
    pub fn start(self, options: TransportOptions) -> CeremonyResult<TransportHandle> {
        self.config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let gate = Arc::new(Mutex::new(true));

        info!(
            "[CEREMONY] Transport starting on topic {} as {}",
            self.config.topic, self.config.device_id
        );

        let task = TransportTask {
            config: self.config,
            substrates: self.substrates,
            clock: self.clock,
            options,
            gate: Arc::clone(&gate),
            current: None,
            inbound: None,
        };
        let join = tokio::spawn(task.run(command_rx, shutdown_rx, done_tx));

        Ok(TransportHandle {
            command_tx,
            shutdown_tx,
            running: AtomicBool::new(true),
            gate,
            task: Mutex::new(Some(join)),
            done_rx,
        })
    }
}

/// Handle to a running transport.
pub struct TransportHandle {
    command_tx: mpsc::Sender<TransportCommand>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    gate: Arc<Mutex<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the task has detached.
    done_rx: watch::Receiver<bool>,
}

impl TransportHandle {
    /// Queues an event for publication on the topic.
    pub async fn publish(&self, event: &CeremonyEvent) -> CeremonyResult<()> {
        if !self.is_running() {
            return Err(CeremonyError::ChannelClosed);
        }
        let bytes = event.encode()?;
        self.command_tx
            .send(TransportCommand::Publish(bytes))
            .await
            .map_err(|_| CeremonyError::ChannelClosed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the transport. Safe to call more than once.
    ///
    /// Inbound delivery is closed before this awaits anything; once it returns
    /// the task has unsubscribed and no heartbeat is pending. Concurrent
    /// callers all wait for that point.
    pub async fn stop(&self) {
        self.close_gate();
        let _ = self.shutdown_tx.send(true);

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("[CEREMONY] Transport task ended abnormally: {}", e);
            }
        }

        // Errs only if the task is gone without finishing, e.g. it panicked.
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn close_gate(&self) {
        self.running.store(false, Ordering::SeqCst);
        *lock(&self.gate) = false;
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close_gate();
        let _ = self.shutdown_tx.send(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TransportTask {
    config: CeremonyConfig,
    substrates: SubstrateWatch,
    clock: Arc<dyn Clock>,
    options: TransportOptions,
    gate: Arc<Mutex<bool>>,
    current: Option<SharedSubstrate>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
}

impl TransportTask {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<TransportCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
        done_tx: watch::Sender<bool>,
    ) {
        self.attach_current().await;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        heartbeat.tick().await;

        let mut substrates_open = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                changed = self.substrates.changed(), if substrates_open => {
                    match changed {
                        Ok(()) => self.attach_current().await,
                        Err(_) => {
                            debug!("[CEREMONY] Substrate source dropped; keeping current substrate");
                            substrates_open = false;
                        }
                    }
                }

                message = recv_inbound(&mut self.inbound) => {
                    match message {
                        Some(bytes) => self.deliver(&bytes),
                        None => {
                            warn!("[CEREMONY] Subscription closed by substrate");
                            self.inbound = None;
                        }
                    }
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        TransportCommand::Publish(bytes) => self.publish(bytes).await,
                    }
                }

                _ = heartbeat.tick() => {
                    self.resubscribe_if_needed().await;
                    self.send_heartbeat().await;
                }
            }
        }

        self.detach().await;
        self.emit_status(TransportStatus::Stopped);
        done_tx.send_replace(true);
        info!("[CEREMONY] Transport stopped");
    }

    async fn attach_current(&mut self) {
        let next = self.substrates.borrow_and_update().clone();

        if let (Some(current), Some(next)) = (&self.current, &next) {
            if Arc::ptr_eq(current, next) {
                return;
            }
        }

        self.detach().await;

        match next {
            None => {
                info!("[CEREMONY] No substrate available; waiting");
                self.emit_status(TransportStatus::WaitingForSubstrate);
            }
            Some(substrate) => {
                self.current = Some(substrate);
                self.subscribe().await;
            }
        }
    }

    async fn subscribe(&mut self) {
        let Some(substrate) = self.current.clone() else {
            return;
        };
        match substrate.subscribe(&self.config.topic).await {
            Ok(rx) => {
                info!(
                    "[CEREMONY] Subscribed to {} via {}",
                    self.config.topic,
                    substrate.name()
                );
                self.inbound = Some(rx);
                self.emit_status(TransportStatus::Subscribed {
                    substrate: substrate.name().to_string(),
                });
            }
            Err(e) => {
                warn!("[CEREMONY] Subscribe via {} failed: {}", substrate.name(), e);
                self.emit_status(TransportStatus::SubscribeFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn resubscribe_if_needed(&mut self) {
        if self.current.is_some() && self.inbound.is_none() {
            debug!("[CEREMONY] Retrying subscription");
            self.subscribe().await;
        }
    }

    async fn detach(&mut self) {
        self.inbound = None;
        if let Some(old) = self.current.take() {
            if let Err(e) = old.unsubscribe(&self.config.topic).await {
                warn!("[CEREMONY] Unsubscribe from {} failed: {}", old.name(), e);
            }
        }
    }

    fn deliver(&self, bytes: &[u8]) {
        let received_at = self.clock.now_ms();
        let observed = match ObservedEvent::decode(bytes, received_at) {
            Ok(observed) => observed,
            Err(e) => {
                warn!("[CEREMONY] Dropping malformed message ({} bytes): {}", bytes.len(), e);
                return;
            }
        };

        // Held across the callback so stop() cannot return mid-delivery.
        let open = lock(&self.gate);
        if *open {
            (self.options.on_event)(observed);
        }
    }

    async fn publish(&self, bytes: Vec<u8>) {
        let Some(substrate) = &self.current else {
            warn!("[CEREMONY] No substrate; dropping outbound message");
            return;
        };
        if let Err(e) = substrate.publish(&self.config.topic, bytes).await {
            warn!("[CEREMONY] Publish via {} failed: {}", substrate.name(), e);
        }
    }

    async fn send_heartbeat(&self) {
        let event = CeremonyEvent::Heartbeat {
            device_id: self.config.device_id.clone(),
            role: Some(self.config.role.clone()),
            key_ref: self.options.key_ref.clone(),
            ts: self.clock.now_ms(),
        };
        match event.encode() {
            Ok(bytes) => {
                debug!("[CEREMONY] Heartbeat from {}", self.config.device_id);
                self.publish(bytes).await;
            }
            Err(e) => warn!("[CEREMONY] Failed to encode heartbeat: {}", e),
        }
    }

    fn emit_status(&self, status: TransportStatus) {
        if let Some(on_status) = &self.options.on_status {
            on_status(status);
        }
    }
}

async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
