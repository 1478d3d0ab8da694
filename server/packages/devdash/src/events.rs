//! Fan-out of status, log and stats events to connected observers.
//!
//! Each observer owns a bounded queue. [`EventBroadcaster::broadcast`] never
//! waits on an observer: a full or closed queue only affects that observer.
//! Observer sets are copy-on-write, so subscribing or dropping an observer
//! while a broadcast is iterating is safe. Dead observers are pruned by the
//! background sweep, never inline with a broadcast.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::format_timestamp;
use crate::process_manager::{LogStream, ProcessStats, ProcessStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Process status transitions and log lines.
    Processes,
    /// Periodic resource usage samples.
    Stats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub app_id: String,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub app_id: String,
    pub stream: LogStream,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppStats {
    pub app_id: String,
    #[serde(flatten)]
    pub stats: ProcessStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsEvent {
    pub apps: Vec<AppStats>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    Status(StatusEvent),
    Log(LogEvent),
    Stats(StatsEvent),
    #[serde(rename_all = "camelCase")]
    Heartbeat { timestamp: String },
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Status(_) => "status",
            DashboardEvent::Log(_) => "log",
            DashboardEvent::Stats(_) => "stats",
            DashboardEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        match self {
            DashboardEvent::Status(_) | DashboardEvent::Log(_) => Some(Channel::Processes),
            DashboardEvent::Stats(_) => Some(Channel::Stats),
            DashboardEvent::Heartbeat { .. } => None,
        }
    }
}

/// An event serialized once and shared by every observer it is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverMessage {
    pub event: &'static str,
    pub data: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub heartbeat_interval: Duration,
    pub observer_timeout: Duration,
    /// Messages queued per observer before further events are dropped for it.
    pub observer_buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            observer_timeout: Duration::from_secs(120),
            observer_buffer: 256,
        }
    }
}

/// Last time an observer consumed a message or acknowledged.
#[derive(Debug)]
struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.last_seen
            .lock()
            .map(|last_seen| now.saturating_duration_since(*last_seen))
            .unwrap_or_default()
    }
}

/// The broadcaster's half of an observer. It holds the only sender, so
/// dropping it from the set ends the subscriber's stream.
#[derive(Debug)]
struct Observer {
    id: u64,
    tx: mpsc::Sender<ObserverMessage>,
    liveness: Arc<Liveness>,
}

type ObserverSet = Arc<Vec<Arc<Observer>>>;

#[derive(Debug)]
pub struct EventBroadcaster {
    config: BroadcasterConfig,
    observers: RwLock<HashMap<Channel, ObserverSet>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Register an observer on `channel`. Dropping the subscription unregisters it.
    pub fn subscribe(self: &Arc<Self>, channel: Channel) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.observer_buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let liveness = Arc::new(Liveness::new());
        let observer = Arc::new(Observer {
            id,
            tx,
            liveness: liveness.clone(),
        });
        self.modify(channel, |set| set.push(observer));
        tracing::debug!(?channel, observer_id = id, "observer connected");
        Subscription {
            channel,
            id,
            liveness,
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    pub fn observer_count(&self, channel: Channel) -> usize {
        self.snapshot(channel).len()
    }

    /// Deliver `event` to every observer on its channel. Returns how many accepted it.
    pub fn broadcast(&self, event: &DashboardEvent) -> usize {
        let Some(channel) = event.channel() else {
            return 0;
        };
        self.send(channel, event)
    }

    fn send(&self, channel: Channel, event: &DashboardEvent) -> usize {
        let observers = self.snapshot(channel);
        if observers.is_empty() {
            return 0;
        }
        let data: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::warn!(error = %err, event = event.name(), "failed to serialize event");
                return 0;
            }
        };
        let message = ObserverMessage {
            event: event.name(),
            data,
        };

        let mut delivered = 0;
        for observer in observers.iter() {
            match observer.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(observer_id = observer.id, "observer queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Send heartbeats and prune observers that are closed or idle past the timeout.
    pub fn sweep(&self, now: Instant) -> usize {
        let heartbeat = DashboardEvent::Heartbeat {
            timestamp: format_timestamp(),
        };
        let mut pruned = 0;
        for channel in [Channel::Processes, Channel::Stats] {
            self.send(channel, &heartbeat);
            let before = self.observer_count(channel);
            self.modify(channel, |set| {
                set.retain(|observer| {
                    !observer.tx.is_closed()
                        && observer.liveness.idle_for(now) < self.config.observer_timeout
                })
            });
            let removed = before.saturating_sub(self.observer_count(channel));
            if removed > 0 {
                tracing::debug!(?channel, removed, "pruned dead observers");
            }
            pruned += removed;
        }
        pruned
    }

    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let broadcaster = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(broadcaster) = broadcaster.upgrade() else { break };
                        broadcaster.sweep(Instant::now());
                    }
                }
            }
        })
    }

    fn snapshot(&self, channel: Channel) -> ObserverSet {
        self.observers
            .read()
            .ok()
            .and_then(|observers| observers.get(&channel).cloned())
            .unwrap_or_default()
    }

    fn modify(&self, channel: Channel, apply: impl FnOnce(&mut Vec<Arc<Observer>>)) {
        let Ok(mut observers) = self.observers.write() else {
            return;
        };
        let current = observers.entry(channel).or_default();
        let mut next: Vec<Arc<Observer>> = current.as_ref().clone();
        apply(&mut next);
        *current = Arc::new(next);
    }

    fn unsubscribe(&self, channel: Channel, id: u64) {
        self.modify(channel, |set| set.retain(|observer| observer.id != id));
        tracing::debug!(?channel, observer_id = id, "observer disconnected");
    }
}

/// A connected observer. Receiving a message counts as a successful write for
/// liveness purposes. The stream ends once the sweep prunes the observer.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    id: u64,
    liveness: Arc<Liveness>,
    rx: mpsc::Receiver<ObserverMessage>,
    broadcaster: Weak<EventBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub async fn recv(&mut self) -> Option<ObserverMessage> {
        let message = self.rx.recv().await;
        if message.is_some() {
            self.liveness.touch();
        }
        message
    }

    /// Mark the observer alive without consuming a message.
    pub fn ack(&self) {
        self.liveness.touch();
    }
}

impl Stream for Subscription {
    type Item = ObserverMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &polled {
            this.liveness.touch();
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.channel, self.id);
        }
    }
}
