// Redis diagnostics via redis-cli INFO inside the cache container.

use crate::config::CacheServiceConfig;
use crate::models::{CacheSnapshot, KeyspaceInfo, ServiceStatus};
use crate::runtime::stats::round1;
use bollard::Docker;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use super::exec;

pub struct CachePoller {
    docker: Docker,
    cfg: CacheServiceConfig,
    cache: Mutex<Option<(Instant, CacheSnapshot)>>,
}

impl CachePoller {
    pub fn new(docker: Docker, cfg: CacheServiceConfig) -> Self {
        Self {
            docker,
            cfg,
            cache: Mutex::new(None),
        }
    }

    pub async fn collect(&self) -> CacheSnapshot {
        let mut cache = self.cache.lock().await;
        if let Some(snap) = super::fresh(&cache, Duration::from_millis(self.cfg.ttl_ms)) {
            return snap;
        }
        if !super::container_running(&self.docker, &self.cfg.container).await {
            return CacheSnapshot::degraded(ServiceStatus::Stopped);
        }
        let cmd = vec!["redis-cli".to_string(), "INFO".to_string()];
        let info = match exec::exec_capture(
            &self.docker,
            &self.cfg.container,
            cmd,
            Duration::from_millis(self.cfg.timeout_ms),
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "cache INFO command failed");
                return CacheSnapshot::degraded(ServiceStatus::Unhealthy);
            }
        };
        let snap = parse_info(&info);
        *cache = Some((Instant::now(), snap.clone()));
        snap
    }
}

/// Parse `INFO` output. Any missing or malformed field degrades to zero
/// rather than failing the snapshot.
fn parse_info(raw: &str) -> CacheSnapshot {
    let mut kv = HashMap::new();
    let mut keyspaces = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.starts_with("db") && value.contains("keys=") {
            if let Some(ks) = parse_keyspace(key, value) {
                keyspaces.push(ks);
            }
            continue;
        }
        kv.insert(key.to_string(), value.to_string());
    }

    let hits = int(&kv, "keyspace_hits");
    let misses = int(&kv, "keyspace_misses");
    let hit_rate_percent = if hits + misses > 0 {
        round1(hits as f64 / (hits + misses) as f64 * 100.0)
    } else {
        0.0
    };

    CacheSnapshot {
        status: ServiceStatus::Healthy,
        memory_used_mib: round1(int(&kv, "used_memory") as f64 / (1024.0 * 1024.0)),
        memory_peak_mib: round1(int(&kv, "used_memory_peak") as f64 / (1024.0 * 1024.0)),
        evicted_keys: int(&kv, "evicted_keys"),
        connected_clients: int(&kv, "connected_clients"),
        ops_per_sec: int(&kv, "instantaneous_ops_per_sec"),
        hit_rate_percent,
        total_commands: int(&kv, "total_commands_processed"),
        last_save_unix: kv
            .get("rdb_last_save_time")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        unsaved_changes: int(&kv, "rdb_changes_since_last_save"),
        aof_enabled: kv.get("aof_enabled").map(String::as_str) == Some("1"),
        keyspaces,
    }
}

fn int(kv: &HashMap<String, String>, key: &str) -> u64 {
    kv.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// One keyspace line, e.g. `db0:keys=5,expires=1,avg_ttl=0`.
fn parse_keyspace(db: &str, value: &str) -> Option<KeyspaceInfo> {
    let mut keys = None;
    let mut expires = None;
    for pair in value.split(',') {
        let (k, v) = pair.split_once('=')?;
        match k {
            "keys" => keys = v.parse().ok(),
            "expires" => expires = v.parse().ok(),
            _ => {}
        }
    }
    Some(KeyspaceInfo {
        db: db.to_string(),
        keys: keys?,
        expires: expires.unwrap_or(0),
    })
}
