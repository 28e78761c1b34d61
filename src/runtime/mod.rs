// Container runtime telemetry via bollard

pub(crate) mod stats;

use crate::config::RuntimeConfig;
use crate::models::{
    BlockIo, ContainerStats, ContainerStatus, HealthStatus, MemoryStats, NetworkIo, RuntimeEvent,
    RuntimeSummary,
};
use bollard::Docker;
use bollard::query_parameters::{
    EventsOptions, InspectContainerOptions, ListContainersOptions, ListNetworksOptions,
    ListVolumesOptions, StatsOptions,
};
use bollard::models::EventMessage;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification from the collector to whoever fuses global state.
#[derive(Debug, Clone)]
pub enum CollectorUpdate {
    /// Full table replace after an inventory reload.
    Inventory {
        containers: Vec<ContainerStats>,
        summary: RuntimeSummary,
    },
    /// One container row changed (stats tick or lifecycle transition).
    Container(ContainerStats),
    /// Raw lifecycle event passthrough.
    Event(RuntimeEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container engine unreachable: {0}")]
    Connect(#[source] bollard::errors::Error),
    #[error("container inventory load failed: {0}")]
    Inventory(#[source] bollard::errors::Error),
}

/// Watches the container runtime: one lifecycle-event stream plus one stats
/// stream per running container. Owns the container table; downstream
/// consumers receive [`CollectorUpdate`]s over the channel given to `new`.
#[derive(Clone)]
pub struct RuntimeCollector {
    docker: Docker,
    update_tx: mpsc::Sender<CollectorUpdate>,
    event_backoff: Duration,
    containers: Arc<RwLock<HashMap<String, ContainerStats>>>,
    summary: Arc<RwLock<RuntimeSummary>>,
    stats_tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    event_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    reload_lock: Arc<Mutex<()>>,
    active: Arc<AtomicBool>,
}

impl RuntimeCollector {
    pub fn new(docker: Docker, update_tx: mpsc::Sender<CollectorUpdate>, cfg: &RuntimeConfig) -> Self {
        Self {
            docker,
            update_tx,
            event_backoff: Duration::from_secs(cfg.event_backoff_secs),
            containers: Arc::new(RwLock::new(HashMap::new())),
            summary: Arc::new(RwLock::new(RuntimeSummary::default())),
            stats_tasks: Arc::new(RwLock::new(HashMap::new())),
            event_task: Arc::new(Mutex::new(None)),
            reload_lock: Arc::new(Mutex::new(())),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Verify the engine is reachable, load a full inventory and open the
    /// lifecycle-event stream. A second call while running is a no-op.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.docker.version().await {
            self.active.store(false, Ordering::SeqCst);
            return Err(RuntimeError::Connect(e));
        }
        let (containers, summary) = match self.reload_inventory().await {
            Ok(v) => v,
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                return Err(RuntimeError::Inventory(e));
            }
        };
        let _ = self
            .update_tx
            .send(CollectorUpdate::Inventory { containers, summary })
            .await;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_event_loop().await });
        *self.event_task.lock().await = Some(handle);
        info!("runtime collector started");
        Ok(())
    }

    /// Idempotent. Flips the active flag first so in-flight stream callbacks
    /// drop their work, then aborts the event task and every stats stream.
    pub async fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.event_task.lock().await.take() {
            handle.abort();
        }
        let mut tasks = self.stats_tasks.write().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        info!("runtime collector stopped");
    }

    /// Current container table (sorted by name) and runtime summary.
    pub async fn snapshot(&self) -> (Vec<ContainerStats>, RuntimeSummary) {
        let mut containers: Vec<ContainerStats> =
            self.containers.read().await.values().cloned().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        (containers, self.summary.read().await.clone())
    }

    /// Reload the inventory and return it without emitting an update. Used
    /// by forced refreshes, where the caller feeds the result through its
    /// own pipeline. Falls back to the current table on engine errors.
    pub async fn pull_inventory(&self) -> (Vec<ContainerStats>, RuntimeSummary) {
        match self.reload_inventory().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "inventory reload failed, serving cached table");
                self.snapshot().await
            }
        }
    }

    /// List + inspect every container, rebuild the table (preserving live
    /// metrics of containers that were already streaming), reconcile the
    /// per-container stats streams, and refresh the runtime summary.
    async fn reload_inventory(
        &self,
    ) -> Result<(Vec<ContainerStats>, RuntimeSummary), bollard::errors::Error> {
        let _guard = self.reload_lock.lock().await;

        let filter = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let listed = self.docker.list_containers(Some(filter)).await?;
        let previous = self.containers.read().await.clone();

        let mut table = HashMap::with_capacity(listed.len());
        let mut running_ids = Vec::new();
        let mut id_to_name = HashMap::new();
        for c in &listed {
            let id = c.id.as_ref().cloned().unwrap_or_default();
            if id.is_empty() {
                continue;
            }
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .cloned()
                .unwrap_or_else(|| id.clone());
            let name = name.trim_start_matches('/').to_string();
            let status = ContainerStatus::from_runtime(
                c.state.as_ref().map(ToString::to_string).as_deref(),
            );
            let uptime = if status.is_running() {
                c.status.clone().unwrap_or_default()
            } else {
                String::new()
            };

            let (health, restart_count) = match self
                .docker
                .inspect_container(&id, Option::<InspectContainerOptions>::None)
                .await
            {
                Ok(inspect) => {
                    let health = inspect
                        .state
                        .as_ref()
                        .and_then(|s| s.health.as_ref())
                        .and_then(|h| h.status.as_ref())
                        .map(ToString::to_string);
                    let restarts = inspect.restart_count.unwrap_or(0).max(0) as u64;
                    (HealthStatus::from_runtime(health.as_deref()), restarts)
                }
                Err(e) => {
                    debug!(error = %e, container = %name, "inspect failed during inventory");
                    (HealthStatus::None, 0)
                }
            };

            let mut row = ContainerStats {
                id: id.clone(),
                name: name.clone(),
                status,
                health,
                cpu_percent: 0.0,
                memory: MemoryStats::default(),
                network: NetworkIo::default(),
                block_io: BlockIo::default(),
                pids: 0,
                restart_count,
                uptime,
            };
            if status.is_running() {
                // Live metrics belong to the stats streams; keep what the
                // stream already measured for containers that stay running.
                if let Some(prev) = previous.get(&id) {
                    row.cpu_percent = prev.cpu_percent;
                    row.memory = prev.memory;
                    row.network = prev.network;
                    row.block_io = prev.block_io;
                    row.pids = prev.pids;
                }
                running_ids.push(id.clone());
                id_to_name.insert(id.clone(), name);
            }
            table.insert(id, row);
        }

        let summary = self.load_summary().await;

        let mut containers: Vec<ContainerStats> = table.values().cloned().collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        *self.containers.write().await = table;
        *self.summary.write().await = summary.clone();

        self.reconcile_streams(running_ids, id_to_name).await;

        Ok((containers, summary))
    }

    /// Engine version plus image/volume/network counts. Each count is best
    /// effort; an unreachable sub-endpoint degrades to zero.
    async fn load_summary(&self) -> RuntimeSummary {
        let engine_version = self
            .docker
            .version()
            .await
            .ok()
            .and_then(|v| v.version)
            .unwrap_or_else(|| "unknown".to_string());
        let images = self
            .docker
            .info()
            .await
            .ok()
            .and_then(|i| i.images)
            .unwrap_or(0)
            .max(0) as u64;
        let volumes = self
            .docker
            .list_volumes(Option::<ListVolumesOptions>::None)
            .await
            .ok()
            .and_then(|v| v.volumes)
            .map(|v| v.len() as u64)
            .unwrap_or(0);
        let networks = self
            .docker
            .list_networks(Option::<ListNetworksOptions>::None)
            .await
            .map(|n| n.len() as u64)
            .unwrap_or(0);
        RuntimeSummary {
            engine_version,
            images,
            volumes,
            networks,
        }
    }

    /// Open stats streams for newly running containers, abort streams whose
    /// container is no longer running.
    async fn reconcile_streams(&self, running_ids: Vec<String>, id_to_name: HashMap<String, String>) {
        let running_set: HashSet<String> = running_ids.iter().cloned().collect();
        let current_keys: Vec<String> = {
            let r = self.stats_tasks.read().await;
            r.keys().cloned().collect()
        };

        let to_add: Vec<(String, String)> = running_ids
            .into_iter()
            .filter(|id| !current_keys.contains(id))
            .map(|id| {
                let name = id_to_name.get(&id).cloned().unwrap_or_else(|| id.clone());
                (id, name)
            })
            .collect();
        let to_remove: Vec<String> = current_keys
            .into_iter()
            .filter(|id| !running_set.contains(id))
            .collect();

        let new_handles: Vec<(String, JoinHandle<()>)> = to_add
            .into_iter()
            .map(|(id, name)| {
                let handle = self.start_stream(id.clone(), name);
                (id, handle)
            })
            .collect();

        let mut streams = self.stats_tasks.write().await;
        for (id, handle) in new_handles {
            streams.insert(id, handle);
        }
        for id in &to_remove {
            if let Some(handle) = streams.remove(id) {
                handle.abort();
            }
        }
    }

    fn start_stream(&self, id: String, name: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                ..Default::default()
            };
            let mut stream = this.docker.stats(&id, Some(options));

            while let Some(result) = stream.next().await {
                if !this.active.load(Ordering::SeqCst) {
                    break;
                }
                match result {
                    Ok(s) => {
                        let Some(metrics) = stats::live_metrics(&s) else {
                            continue;
                        };
                        let updated = {
                            let mut table = this.containers.write().await;
                            table.get_mut(&id).map(|row| {
                                row.cpu_percent = metrics.cpu_percent;
                                row.memory = metrics.memory;
                                row.network = metrics.network;
                                row.block_io = metrics.block_io;
                                row.pids = metrics.pids;
                                row.clone()
                            })
                        };
                        // Dropped ticks are fine, the next sample is a second away.
                        if let Some(row) = updated {
                            if this
                                .update_tx
                                .try_send(CollectorUpdate::Container(row))
                                .is_err()
                            {
                                debug!("update channel full, dropping stats tick for {}", name);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("stats stream error for container {}: {}", name, e);
                        break;
                    }
                }
            }
            debug!("stats stream ended for container {}", name);
            this.stats_tasks.write().await.remove(&id);
        })
    }

    /// Lifecycle-event loop. Reconnects after a fixed backoff while active,
    /// never after `stop()`.
    async fn run_event_loop(&self) {
        loop {
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            let opts = EventsOptions {
                filters: Some(filters),
                ..Default::default()
            };
            let mut stream = self.docker.events(Some(opts));

            while let Some(msg) = stream.next().await {
                if !self.active.load(Ordering::SeqCst) {
                    return;
                }
                match msg {
                    Ok(ev) => self.handle_event(ev).await,
                    Err(e) => {
                        warn!(error = %e, "lifecycle event stream error");
                        break;
                    }
                }
            }

            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            debug!(
                "lifecycle event stream closed, reconnecting in {:?}",
                self.event_backoff
            );
            tokio::time::sleep(self.event_backoff).await;
        }
    }

    async fn handle_event(&self, ev: EventMessage) {
        let action = ev.action.as_ref().map(ToString::to_string).unwrap_or_default();
        let actor = ev.actor.as_ref();
        let id = actor.and_then(|a| a.id.clone()).unwrap_or_default();
        if id.is_empty() || action.is_empty() {
            return;
        }
        let name = actor
            .and_then(|a| a.attributes.as_ref())
            .and_then(|attrs| attrs.get("name").cloned())
            .unwrap_or_else(|| id.clone());
        let timestamp = ev.time.unwrap_or_else(|| chrono::Utc::now().timestamp());

        let event = RuntimeEvent {
            action: action.clone(),
            container_id: id.clone(),
            container_name: name.clone(),
            timestamp,
        };
        let _ = self.update_tx.send(CollectorUpdate::Event(event)).await;

        if let Some(status) = action.strip_prefix("health_status") {
            let health = HealthStatus::from_runtime(Some(status.trim_start_matches(':').trim()));
            let updated = {
                let mut table = self.containers.write().await;
                table.get_mut(&id).map(|row| {
                    row.health = health;
                    row.clone()
                })
            };
            if let Some(row) = updated {
                let _ = self.update_tx.send(CollectorUpdate::Container(row)).await;
            }
            return;
        }

        match action.as_str() {
            "stop" | "die" => {
                if let Some(handle) = self.stats_tasks.write().await.remove(&id) {
                    handle.abort();
                }
                let updated = {
                    let mut table = self.containers.write().await;
                    table.get_mut(&id).map(|row| {
                        row.zero_live_metrics();
                        row.status = ContainerStatus::Stopped;
                        row.uptime.clear();
                        row.clone()
                    })
                };
                if let Some(row) = updated {
                    let _ = self.update_tx.send(CollectorUpdate::Container(row)).await;
                }
            }
            "start" | "restart" | "pause" | "unpause" | "destroy" | "create" => {
                match self.reload_inventory().await {
                    Ok((containers, summary)) => {
                        let _ = self
                            .update_tx
                            .send(CollectorUpdate::Inventory { containers, summary })
                            .await;
                    }
                    Err(e) => {
                        warn!(error = %e, action = %action, "inventory reload after event failed");
                    }
                }
            }
            _ => {}
        }
    }
}
