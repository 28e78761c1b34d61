// Fan-out of fused state changes to stream subscribers.

use crate::config::PublishingConfig;
use crate::models::StreamMessage;
use crate::orchestrator::{Orchestrator, StateEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

struct Subscriber {
    tx: mpsc::Sender<StreamMessage>,
    /// Refreshed on every successful delivery. A subscriber whose buffer
    /// stays full never refreshes it and ages out in the sweep.
    last_activity: Instant,
}

type Registry = Arc<Mutex<HashMap<u64, Subscriber>>>;

pub struct Broadcaster {
    orchestrator: Arc<Orchestrator>,
    subscribers: Registry,
    next_id: AtomicU64,
    subscriber_buffer: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    active: AtomicBool,
}

impl Broadcaster {
    /// Spawn the bridge (orchestrator notifications to stream messages)
    /// and the keep-alive schedule, bound to the given orchestrator.
    pub fn start(orchestrator: Arc<Orchestrator>, cfg: &PublishingConfig) -> Arc<Self> {
        let subscribers: Registry = Arc::new(Mutex::new(HashMap::new()));
        let bridge = tokio::spawn(run_bridge(orchestrator.subscribe(), subscribers.clone()));
        let keepalive = tokio::spawn(run_keepalive(
            subscribers.clone(),
            Duration::from_secs(cfg.keepalive_interval_secs),
            Duration::from_secs(cfg.stale_after_secs),
        ));
        Arc::new(Self {
            orchestrator,
            subscribers,
            next_id: AtomicU64::new(1),
            subscriber_buffer: cfg.subscriber_buffer,
            tasks: Mutex::new(vec![bridge, keepalive]),
            active: AtomicBool::new(true),
        })
    }

    /// Register a subscriber and hand it the current state as its first
    /// message. Dropping the returned subscription unregisters it.
    pub async fn create_subscription(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let state = self.orchestrator.state().await;
        // Fresh channel; the initial snapshot always fits.
        let _ = tx.try_send(StreamMessage::Initial {
            state: (*state).clone(),
        });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(
                id,
                Subscriber {
                    tx,
                    last_activity: Instant::now(),
                },
            );
        }
        debug!(subscriber_id = id, "stream subscriber attached");
        Subscription {
            id,
            rx,
            registry: self.subscribers.clone(),
        }
    }

    /// Push one message to every subscriber. Never raises: a full buffer
    /// drops the message for that subscriber, a closed one is removed.
    pub fn publish(&self, msg: &StreamMessage) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        deliver(&self.subscribers, msg);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    /// Idempotent teardown: aborts the bridge and keep-alive, closes every
    /// subscriber stream and stops the orchestrator underneath.
    pub async fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }
        self.orchestrator.stop().await;
        info!("broadcaster shut down");
    }
}

pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<StreamMessage>,
    registry: Registry,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the subscriber was unregistered and
    /// the in-flight buffer is drained.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.registry.lock() {
            subs.remove(&self.id);
        }
    }
}

async fn run_bridge(mut events: broadcast::Receiver<StateEvent>, subscribers: Registry) {
    loop {
        match events.recv().await {
            Ok(StateEvent::Changed(state)) => {
                deliver(
                    &subscribers,
                    &StreamMessage::State {
                        state: (*state).clone(),
                    },
                );
            }
            Ok(StateEvent::Runtime(event)) => {
                deliver(&subscribers, &StreamMessage::DockerEvent { event });
            }
            Ok(StateEvent::Service(service, snapshot)) => {
                deliver(&subscribers, &StreamMessage::ServiceUpdate { service, snapshot });
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "state event stream lagged, some updates skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("subscriber bridge shutting down");
}

async fn run_keepalive(subscribers: Registry, every: Duration, stale_after: Duration) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await;
    loop {
        tick.tick().await;
        sweep_stale(&subscribers, stale_after);
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        deliver(&subscribers, &StreamMessage::Ping { timestamp });
    }
}

fn deliver(subscribers: &Mutex<HashMap<u64, Subscriber>>, msg: &StreamMessage) {
    let Ok(mut subs) = subscribers.lock() else {
        return;
    };
    subs.retain(|id, sub| match sub.tx.try_send(msg.clone()) {
        Ok(()) => {
            sub.last_activity = Instant::now();
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(subscriber_id = *id, "subscriber buffer full, message dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(subscriber_id = *id, "subscriber disconnected");
            false
        }
    });
}

fn sweep_stale(subscribers: &Mutex<HashMap<u64, Subscriber>>, stale_after: Duration) {
    let Ok(mut subs) = subscribers.lock() else {
        return;
    };
    subs.retain(|id, sub| {
        if sub.last_activity.elapsed() > stale_after {
            warn!(subscriber_id = *id, "dropping stale subscriber");
            false
        } else {
            true
        }
    });
}
