// Fused global state: containers, runtime summary, services, aggregates

use serde::{Deserialize, Serialize};

use super::{ContainerStats, ServiceSnapshots};

/// Engine-level totals, refreshed with every inventory load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSummary {
    pub engine_version: String,
    pub images: u64,
    pub volumes: u64,
    pub networks: u64,
}

/// Stack-wide totals over currently running containers. Always derived from
/// the container collection, never carried independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub cpu_percent: f64,
    pub memory_used_gib: f64,
    pub memory_limit_gib: f64,
    /// Whole percent of summed used over summed limit; 0 when no running
    /// container has a memory cap.
    pub memory_percent: f64,
    pub network_rx_mib: f64,
    pub network_tx_mib: f64,
    pub running_containers: u64,
}

/// The single externally visible artifact of the pipeline. Consumers treat
/// every copy they receive as the authoritative full picture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalState {
    pub containers: Vec<ContainerStats>,
    pub runtime: RuntimeSummary,
    pub services: ServiceSnapshots,
    pub aggregate: AggregateMetrics,
    /// Epoch milliseconds of the last mutation.
    pub last_update: u64,
    pub healthy: bool,
}

impl GlobalState {
    pub fn container(&self, id: &str) -> Option<&ContainerStats> {
        self.containers.iter().find(|c| c.id == id)
    }
}
