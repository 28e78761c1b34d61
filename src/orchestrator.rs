// Fuses collector updates and service snapshots into the global state.
// One writer task owns all mutation; readers get cheap Arc clones.

use crate::config::AppConfig;
use crate::models::{
    AggregateMetrics, ContainerStats, GlobalState, HealthStatus, RuntimeEvent, ServiceKind,
    ServiceSnapshot,
};
use crate::pollers::{CachePoller, DatabasePoller, GraphqlPoller};
use crate::runtime::stats::{round1, round2};
use crate::runtime::{CollectorUpdate, RuntimeCollector};
use bollard::Docker;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

/// Capacity for the collector's update channel. Stats ticks arrive on it
/// about once a second per running container.
const COLLECTOR_CHANNEL_CAPACITY: usize = 256;
/// Capacity for service snapshots and refresh traffic.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Notification fanned out to state subscribers.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// The state changed; carries the full post-change snapshot.
    Changed(Arc<GlobalState>),
    /// One container lifecycle event, passed through unfused.
    Runtime(RuntimeEvent),
    /// One service produced a fresh snapshot.
    Service(ServiceKind, ServiceSnapshot),
}

enum Update {
    Collector(CollectorUpdate),
    Service(ServiceSnapshot),
    /// Ack once everything queued ahead of this marker has been applied.
    Sync(oneshot::Sender<Arc<GlobalState>>),
}

pub struct Orchestrator {
    collector: RuntimeCollector,
    database: Arc<DatabasePoller>,
    graphql: Arc<GraphqlPoller>,
    cache: Arc<CachePoller>,
    poll_intervals: [Duration; 3],
    state: Arc<RwLock<Arc<GlobalState>>>,
    events: broadcast::Sender<StateEvent>,
    updates_tx: mpsc::Sender<Update>,
    collector_rx: Mutex<Option<mpsc::Receiver<CollectorUpdate>>>,
    updates_rx: Mutex<Option<mpsc::Receiver<Update>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Orchestrator {
    pub fn new(docker: Docker, cfg: &AppConfig) -> Self {
        let (collector_tx, collector_rx) = mpsc::channel(COLLECTOR_CHANNEL_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(cfg.publishing.broadcast_capacity);
        Self {
            collector: RuntimeCollector::new(docker.clone(), collector_tx, &cfg.runtime),
            database: Arc::new(DatabasePoller::new(
                docker.clone(),
                cfg.services.database.clone(),
            )),
            graphql: Arc::new(GraphqlPoller::new(
                docker.clone(),
                cfg.services.graphql.clone(),
            )),
            cache: Arc::new(CachePoller::new(docker, cfg.services.cache.clone())),
            poll_intervals: [
                Duration::from_millis(cfg.services.database.interval_ms),
                Duration::from_millis(cfg.services.graphql.interval_ms),
                Duration::from_millis(cfg.services.cache.interval_ms),
            ],
            state: Arc::new(RwLock::new(Arc::new(GlobalState::default()))),
            events,
            updates_tx,
            collector_rx: Mutex::new(Some(collector_rx)),
            updates_rx: Mutex::new(Some(updates_rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Bring the whole pipeline up: fusion task, collector, one initial poll
    /// of every service, then the periodic poll schedules. A second call
    /// while running is a no-op; if the collector cannot start, everything
    /// already spawned is torn down again and the error surfaces.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let receivers = {
            let mut collector_rx = self.collector_rx.lock().await;
            let mut updates_rx = self.updates_rx.lock().await;
            collector_rx.take().zip(updates_rx.take())
        };
        let Some((collector_rx, updates_rx)) = receivers else {
            self.started.store(false, Ordering::SeqCst);
            anyhow::bail!("telemetry pipeline cannot be restarted once stopped");
        };

        let fusion = tokio::spawn(run_fusion(
            self.state.clone(),
            self.events.clone(),
            collector_rx,
            updates_rx,
        ));

        if let Err(e) = self.collector.start().await {
            fusion.abort();
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        self.tasks.lock().await.push(fusion);

        // First snapshots of every service before the surface goes live.
        let (db, gql, cache) = tokio::join!(
            self.database.collect(),
            self.graphql.collect(),
            self.cache.collect(),
        );
        for snapshot in [
            ServiceSnapshot::Database(db),
            ServiceSnapshot::Graphql(gql),
            ServiceSnapshot::Cache(cache),
        ] {
            let _ = self.updates_tx.send(Update::Service(snapshot)).await;
        }

        self.spawn_poll_tasks().await;
        info!("orchestrator started");
        Ok(())
    }

    /// Idempotent teardown: stops the collector, then aborts the poll
    /// schedules and the fusion task.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.collector.stop().await;
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("orchestrator stopped");
    }

    /// The current fused state.
    pub async fn state(&self) -> Arc<GlobalState> {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Force-refresh everything: reload the container inventory, collect all
    /// three services (their TTL caches still apply) and return the state
    /// with all of it applied. Every piece flows through the fusion channel,
    /// so the returned state deterministically includes this refresh.
    pub async fn refresh(&self) -> anyhow::Result<Arc<GlobalState>> {
        anyhow::ensure!(
            self.started.load(Ordering::SeqCst),
            "telemetry pipeline is not running"
        );
        let (containers, summary) = self.collector.pull_inventory().await;
        let (db, gql, cache) = tokio::join!(
            self.database.collect(),
            self.graphql.collect(),
            self.cache.collect(),
        );
        self.updates_tx
            .send(Update::Collector(CollectorUpdate::Inventory {
                containers,
                summary,
            }))
            .await?;
        for snapshot in [
            ServiceSnapshot::Database(db),
            ServiceSnapshot::Graphql(gql),
            ServiceSnapshot::Cache(cache),
        ] {
            self.updates_tx.send(Update::Service(snapshot)).await?;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.updates_tx.send(Update::Sync(ack_tx)).await?;
        Ok(ack_rx.await?)
    }

    async fn spawn_poll_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        let [db_every, gql_every, cache_every] = self.poll_intervals;

        {
            let poller = self.database.clone();
            let tx = self.updates_tx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = interval(db_every);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let snapshot = ServiceSnapshot::Database(poller.collect().await);
                    if tx.send(Update::Service(snapshot)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        {
            let poller = self.graphql.clone();
            let tx = self.updates_tx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = interval(gql_every);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let snapshot = ServiceSnapshot::Graphql(poller.collect().await);
                    if tx.send(Update::Service(snapshot)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        {
            let poller = self.cache.clone();
            let tx = self.updates_tx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = interval(cache_every);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let snapshot = ServiceSnapshot::Cache(poller.collect().await);
                    if tx.send(Update::Service(snapshot)).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }
}

/// The single writer. Applies updates from the collector and the pollers to
/// a working copy, swaps an Arc of it into the shared slot and notifies
/// subscribers. Exits when both inbound channels close.
async fn run_fusion(
    shared: Arc<RwLock<Arc<GlobalState>>>,
    events: broadcast::Sender<StateEvent>,
    mut collector_rx: mpsc::Receiver<CollectorUpdate>,
    mut updates_rx: mpsc::Receiver<Update>,
) {
    let mut state = GlobalState::default();
    loop {
        tokio::select! {
            Some(update) = collector_rx.recv() => {
                apply_collector(&mut state, update, &shared, &events).await;
            }
            Some(update) = updates_rx.recv() => {
                match update {
                    Update::Collector(u) => {
                        apply_collector(&mut state, u, &shared, &events).await;
                    }
                    Update::Service(snapshot) => {
                        let kind = apply_service(&mut state, snapshot.clone());
                        let _ = events.send(StateEvent::Service(kind, snapshot));
                        publish_changed(&mut state, &shared, &events).await;
                    }
                    Update::Sync(ack) => {
                        let _ = ack.send(shared.read().await.clone());
                    }
                }
            }
            else => break,
        }
    }
    tracing::debug!("fusion task shutting down");
}

async fn apply_collector(
    state: &mut GlobalState,
    update: CollectorUpdate,
    shared: &Arc<RwLock<Arc<GlobalState>>>,
    events: &broadcast::Sender<StateEvent>,
) {
    match update {
        CollectorUpdate::Container(row) => {
            upsert_container(state, row);
            publish_changed(state, shared, events).await;
        }
        CollectorUpdate::Inventory {
            containers,
            summary,
        } => {
            state.containers = containers;
            state.runtime = summary;
            state.aggregate = aggregate_running(&state.containers);
            publish_changed(state, shared, events).await;
        }
        CollectorUpdate::Event(event) => {
            let _ = events.send(StateEvent::Runtime(event));
        }
    }
}

async fn publish_changed(
    state: &mut GlobalState,
    shared: &Arc<RwLock<Arc<GlobalState>>>,
    events: &broadcast::Sender<StateEvent>,
) {
    finalize(state);
    let arc = Arc::new(state.clone());
    *shared.write().await = arc.clone();
    let _ = events.send(StateEvent::Changed(arc));
}

/// Replace or insert one row by container id, keeping name order, and
/// rederive the aggregate.
fn upsert_container(state: &mut GlobalState, row: ContainerStats) {
    match state.containers.iter_mut().find(|c| c.id == row.id) {
        Some(slot) => *slot = row,
        None => state.containers.push(row),
    }
    state.containers.sort_by(|a, b| a.name.cmp(&b.name));
    state.aggregate = aggregate_running(&state.containers);
}

/// Replace exactly one service slot; returns which one.
fn apply_service(state: &mut GlobalState, snapshot: ServiceSnapshot) -> ServiceKind {
    match snapshot {
        ServiceSnapshot::Database(s) => {
            state.services.database = s;
            ServiceKind::Database
        }
        ServiceSnapshot::Graphql(s) => {
            state.services.graphql = s;
            ServiceKind::Graphql
        }
        ServiceSnapshot::Cache(s) => {
            state.services.cache = s;
            ServiceKind::Cache
        }
    }
}

fn finalize(state: &mut GlobalState) {
    state.last_update = chrono::Utc::now().timestamp_millis().max(0) as u64;
    state.healthy = state.services.all_healthy()
        && !state
            .containers
            .iter()
            .any(|c| c.status.is_running() && c.health == HealthStatus::Unhealthy);
}

/// Stack totals over running containers only. Stopped rows contribute
/// nothing, so a die event followed by a metric zeroing cannot leak into
/// the totals.
fn aggregate_running(containers: &[ContainerStats]) -> AggregateMetrics {
    let mut cpu = 0.0;
    let mut used = 0.0;
    let mut limit = 0.0;
    let mut rx = 0.0;
    let mut tx = 0.0;
    let mut running = 0u64;
    for c in containers.iter().filter(|c| c.status.is_running()) {
        running += 1;
        cpu += c.cpu_percent;
        used += c.memory.used_gib;
        limit += c.memory.limit_gib;
        rx += c.network.rx_mib;
        tx += c.network.tx_mib;
    }
    let memory_percent = if limit > 0.0 {
        (used / limit * 100.0).round()
    } else {
        0.0
    };
    AggregateMetrics {
        cpu_percent: round1(cpu),
        memory_used_gib: round2(used),
        memory_limit_gib: round2(limit),
        memory_percent,
        network_rx_mib: round1(rx),
        network_tx_mib: round1(tx),
        running_containers: running,
    }
}
