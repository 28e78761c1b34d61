// Backing-service snapshot models (database, GraphQL engine, cache)

use serde::{Deserialize, Serialize};

/// Health tag carried by every service snapshot. `Stopped` means the backing
/// container is not running; `Unhealthy` means it runs but diagnostics failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Stopped,
}

/// Which backing service a snapshot or update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Database,
    Graphql,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSize {
    pub name: String,
    pub size_mib: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    pub status: ServiceStatus,
    pub active_connections: u64,
    pub idle_connections: u64,
    pub max_connections: u64,
    pub connection_percent: f64,
    pub databases: Vec<DatabaseSize>,
    pub total_size_mib: f64,
    pub active_queries: u64,
    pub slow_queries: u64,
    pub cache_hit_percent: f64,
    pub transactions_per_sec: f64,
}

impl DatabaseSnapshot {
    pub fn degraded(status: ServiceStatus) -> Self {
        Self {
            status,
            active_connections: 0,
            idle_connections: 0,
            max_connections: 0,
            connection_percent: 0.0,
            databases: Vec::new(),
            total_size_mib: 0.0,
            active_queries: 0,
            slow_queries: 0,
            cache_hit_percent: 0.0,
            transactions_per_sec: 0.0,
        }
    }
}

/// One metadata object the engine reports as inconsistent (e.g. a tracked
/// table that no longer exists in the source database).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InconsistentObject {
    pub name: String,
    pub object_type: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlSnapshot {
    pub status: ServiceStatus,
    pub version: String,
    pub tables: u64,
    pub relationships: u64,
    pub permissions: u64,
    pub actions: u64,
    pub event_triggers: u64,
    pub cron_triggers: u64,
    pub remote_schemas: u64,
    pub inconsistent_objects: Vec<InconsistentObject>,
}

impl GraphqlSnapshot {
    pub fn degraded(status: ServiceStatus) -> Self {
        Self {
            status,
            version: String::new(),
            tables: 0,
            relationships: 0,
            permissions: 0,
            actions: 0,
            event_triggers: 0,
            cron_triggers: 0,
            remote_schemas: 0,
            inconsistent_objects: Vec::new(),
        }
    }
}

/// Key/expiry counts for one logical database (e.g. "db0").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyspaceInfo {
    pub db: String,
    pub keys: u64,
    pub expires: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub status: ServiceStatus,
    pub memory_used_mib: f64,
    pub memory_peak_mib: f64,
    pub evicted_keys: u64,
    pub connected_clients: u64,
    pub ops_per_sec: u64,
    pub hit_rate_percent: f64,
    pub total_commands: u64,
    /// Unix time of the last successful dump to disk; 0 when never saved.
    pub last_save_unix: i64,
    pub unsaved_changes: u64,
    pub aof_enabled: bool,
    pub keyspaces: Vec<KeyspaceInfo>,
}

impl CacheSnapshot {
    pub fn degraded(status: ServiceStatus) -> Self {
        Self {
            status,
            memory_used_mib: 0.0,
            memory_peak_mib: 0.0,
            evicted_keys: 0,
            connected_clients: 0,
            ops_per_sec: 0,
            hit_rate_percent: 0.0,
            total_commands: 0,
            last_save_unix: 0,
            unsaved_changes: 0,
            aof_enabled: false,
            keyspaces: Vec::new(),
        }
    }
}

/// Snapshot of any one backing service; serializes as the inner shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceSnapshot {
    Database(DatabaseSnapshot),
    Graphql(GraphqlSnapshot),
    Cache(CacheSnapshot),
}

/// The three per-service slots of the global state, each replaced wholesale
/// by its poller's most recent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshots {
    pub database: DatabaseSnapshot,
    pub graphql: GraphqlSnapshot,
    pub cache: CacheSnapshot,
}

impl Default for ServiceSnapshots {
    fn default() -> Self {
        Self {
            database: DatabaseSnapshot::degraded(ServiceStatus::Stopped),
            graphql: GraphqlSnapshot::degraded(ServiceStatus::Stopped),
            cache: CacheSnapshot::degraded(ServiceStatus::Stopped),
        }
    }
}

impl ServiceSnapshots {
    pub fn all_healthy(&self) -> bool {
        self.database.status == ServiceStatus::Healthy
            && self.graphql.status == ServiceStatus::Healthy
            && self.cache.status == ServiceStatus::Healthy
    }
}
