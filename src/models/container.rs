// Container lifecycle, health and per-container resource models

use serde::{Deserialize, Serialize};

/// Container lifecycle status; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Paused,
    Restarting,
    Dead,
}

impl ContainerStatus {
    /// Parse from the engine's state string. `created`, `exited` and
    /// `removing` all collapse into `Stopped`, as does a missing state.
    pub fn from_runtime(s: Option<&str>) -> Self {
        match s.map(str::to_lowercase).as_deref() {
            Some("running") => ContainerStatus::Running,
            Some("paused") => ContainerStatus::Paused,
            Some("restarting") => ContainerStatus::Restarting,
            Some("dead") => ContainerStatus::Dead,
            _ => ContainerStatus::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// Container health as reported by the engine's healthcheck; `None` when the
/// image defines no healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

impl HealthStatus {
    pub fn from_runtime(s: Option<&str>) -> Self {
        match s.map(str::to_lowercase).as_deref() {
            Some("healthy") => HealthStatus::Healthy,
            Some("unhealthy") => HealthStatus::Unhealthy,
            Some("starting") => HealthStatus::Starting,
            _ => HealthStatus::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub used_gib: f64,
    pub limit_gib: f64,
    /// Whole percent of the limit; 0 when the container has no memory cap.
    pub percent: f64,
}

/// Cumulative bytes received/transmitted since container start, in MiB.
/// These are counters, not rates; consumers wanting rates must diff
/// successive snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIo {
    pub rx_mib: f64,
    pub tx_mib: f64,
}

/// Cumulative block device reads/writes since container start, in MiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockIo {
    pub read_mib: f64,
    pub write_mib: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub health: HealthStatus,
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub network: NetworkIo,
    pub block_io: BlockIo,
    pub pids: u64,
    pub restart_count: u64,
    /// Human uptime string from the engine (e.g. "Up 3 hours"); empty while
    /// the row waits for the next inventory load after a stop.
    pub uptime: String,
}

impl ContainerStats {
    /// Zero every live metric, keeping identity and lifecycle fields, so a
    /// stopped container's row reads as explicitly idle rather than frozen
    /// at its last sample.
    pub fn zero_live_metrics(&mut self) {
        self.cpu_percent = 0.0;
        self.memory = MemoryStats::default();
        self.network = NetworkIo::default();
        self.block_io = BlockIo::default();
        self.pids = 0;
    }
}
