//! In-memory broadcast substrate shared by the ceremony integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use keyquorum_ceremony::{
    BroadcastSubstrate, CeremonyError, CeremonyEvent, CeremonyResult, SharedSubstrate,
    TransportStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const SUBSCRIBER_BUFFER: usize = 256;

// ── Hub ─────────────────────────────────────────────────────────

/// A topic fan-out shared by every substrate attached to it.
#[derive(Default)]
pub struct MemoryHub {
    subscribers: Mutex<HashMap<String, Vec<(String, mpsc::Sender<Vec<u8>>)>>>,
    /// Replayed to every new subscriber, like a relay with history.
    retained: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a raw listener, as if another device were on the topic.
    pub fn listen(&self, topic: &str) -> mpsc::Receiver<Vec<u8>> {
        self.add(topic, "listener")
    }

    /// Keeps `payload` for delivery on every later subscribe to `topic`.
    pub fn retain(&self, topic: &str, payload: &[u8]) {
        self.retained
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(payload.to_vec());
    }

    /// Delivers bytes to every subscriber of `topic`.
    pub fn broadcast(&self, topic: &str, payload: &[u8]) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|(_, tx)| !tx.is_closed());
            for (_, tx) in list.iter() {
                let _ = tx.try_send(payload.to_vec());
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(topic)
            .map(|list| list.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn add(&self, topic: &str, owner: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Some(history) = self.retained.lock().unwrap().get(topic) {
            for payload in history {
                let _ = tx.try_send(payload.clone());
            }
        }
        self.subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((owner.to_string(), tx));
        rx
    }

    fn remove(&self, topic: &str, owner: &str) {
        if let Some(list) = self.subscribers.lock().unwrap().get_mut(topic) {
            list.retain(|(o, _)| o != owner);
        }
    }
}

// ── Substrate ───────────────────────────────────────────────────

/// One device's connection to a [`MemoryHub`].
pub struct MemorySubstrate {
    name: String,
    hub: Arc<MemoryHub>,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    unsubscribe_delay: Mutex<Duration>,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub published: Mutex<Vec<Vec<u8>>>,
}

impl MemorySubstrate {
    pub fn new(name: &str, hub: &Arc<MemoryHub>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            hub: Arc::clone(hub),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            unsubscribe_delay: Mutex::new(Duration::ZERO),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Makes `unsubscribe` take `delay` before leaving the hub.
    pub fn slow_unsubscribe(&self, delay: Duration) {
        *self.unsubscribe_delay.lock().unwrap() = delay;
    }

    /// Decoded events this substrate has published.
    pub fn published_events(&self) -> Vec<CeremonyEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.published_events()
            .iter()
            .filter(|e| matches!(e, CeremonyEvent::Heartbeat { .. }))
            .count()
    }
}

#[async_trait]
impl BroadcastSubstrate for MemorySubstrate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, topic: &str) -> CeremonyResult<mpsc::Receiver<Vec<u8>>> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(CeremonyError::Substrate(format!("{} refused subscription", self.name)));
        }
        Ok(self.hub.add(topic, &self.name))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CeremonyResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(CeremonyError::Substrate(format!("{} is offline", self.name)));
        }
        self.published.lock().unwrap().push(payload.clone());
        self.hub.broadcast(topic, &payload);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> CeremonyResult<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.unsubscribe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.hub.remove(topic, &self.name);
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────

pub fn substrate_watch(
    initial: Option<Arc<MemorySubstrate>>,
) -> (
    watch::Sender<Option<SharedSubstrate>>,
    watch::Receiver<Option<SharedSubstrate>>,
) {
    watch::channel(initial.map(|s| s as SharedSubstrate))
}

/// Collects whatever a callback receives.
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> Arc<dyn Fn(T) + Send + Sync> {
        let items = Arc::clone(&self.items);
        Arc::new(move |item| items.lock().unwrap().push(item))
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

pub fn subscribed_to(status: &TransportStatus, name: &str) -> bool {
    matches!(status, TransportStatus::Subscribed { substrate } if substrate == name)
}

/// Lets spawned tasks run without advancing paused time meaningfully.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `condition` in 1ms steps of (possibly paused) time.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    condition()
}
