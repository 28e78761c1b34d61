// Hasura GraphQL engine diagnostics via in-container curl against the
// engine's local admin API.

use crate::config::GraphqlServiceConfig;
use crate::models::{GraphqlSnapshot, InconsistentObject, ServiceStatus};
use bollard::Docker;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use super::exec;

const ADMIN_BASE: &str = "http://localhost:8080";
const EXPORT_METADATA: &str = r#"{"type":"export_metadata","args":{}}"#;
const INCONSISTENT_METADATA: &str = r#"{"type":"get_inconsistent_metadata","args":{}}"#;

pub struct GraphqlPoller {
    docker: Docker,
    cfg: GraphqlServiceConfig,
    cache: Mutex<Option<(Instant, GraphqlSnapshot)>>,
}

impl GraphqlPoller {
    pub fn new(docker: Docker, cfg: GraphqlServiceConfig) -> Self {
        Self {
            docker,
            cfg,
            cache: Mutex::new(None),
        }
    }

    pub async fn collect(&self) -> GraphqlSnapshot {
        let mut cache = self.cache.lock().await;
        if let Some(snap) = super::fresh(&cache, Duration::from_millis(self.cfg.ttl_ms)) {
            return snap;
        }
        if !super::container_running(&self.docker, &self.cfg.container).await {
            return GraphqlSnapshot::degraded(ServiceStatus::Stopped);
        }
        let snap = self.poll().await;
        if snap.status == ServiceStatus::Healthy {
            *cache = Some((Instant::now(), snap.clone()));
        }
        snap
    }

    async fn poll(&self) -> GraphqlSnapshot {
        let limit = Duration::from_millis(self.cfg.timeout_ms);

        // The metadata export is the primary diagnostic; without it the
        // whole snapshot reads unhealthy.
        let metadata = match self.request(Some(EXPORT_METADATA), "/v1/metadata", limit).await {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "graphql metadata export failed");
                return GraphqlSnapshot::degraded(ServiceStatus::Unhealthy);
            }
        };
        let counts = parse_metadata(&metadata);

        let version = match self.request(None, "/v1/version", limit).await {
            Ok(out) => parse_version(&out),
            Err(e) => {
                warn!(error = %e, "graphql version probe failed");
                "unknown".to_string()
            }
        };

        let inconsistent_objects = match self
            .request(Some(INCONSISTENT_METADATA), "/v1/metadata", limit)
            .await
        {
            Ok(out) => parse_inconsistencies(&out),
            Err(e) => {
                warn!(error = %e, "graphql consistency check failed");
                Vec::new()
            }
        };

        GraphqlSnapshot {
            status: ServiceStatus::Healthy,
            version,
            tables: counts.tables,
            relationships: counts.relationships,
            permissions: counts.permissions,
            actions: counts.actions,
            event_triggers: counts.event_triggers,
            cron_triggers: counts.cron_triggers,
            remote_schemas: counts.remote_schemas,
            inconsistent_objects,
        }
    }

    async fn request(
        &self,
        body: Option<&str>,
        path: &str,
        limit: Duration,
    ) -> anyhow::Result<String> {
        let mut cmd = vec!["curl".to_string(), "-sf".to_string()];
        if let Some(secret) = &self.cfg.admin_secret {
            cmd.push("-H".to_string());
            cmd.push(format!("x-hasura-admin-secret: {secret}"));
        }
        if let Some(body) = body {
            cmd.push("-X".to_string());
            cmd.push("POST".to_string());
            cmd.push("-H".to_string());
            cmd.push("Content-Type: application/json".to_string());
            cmd.push("-d".to_string());
            cmd.push(body.to_string());
        }
        cmd.push(format!("{ADMIN_BASE}{path}"));
        exec::exec_capture(&self.docker, &self.cfg.container, cmd, limit).await
    }
}

#[derive(Debug, Default, PartialEq)]
struct MetadataCounts {
    tables: u64,
    relationships: u64,
    permissions: u64,
    actions: u64,
    event_triggers: u64,
    cron_triggers: u64,
    remote_schemas: u64,
}

fn arr_len(v: &Value, key: &str) -> u64 {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| a.len() as u64)
        .unwrap_or(0)
}

/// Count tracked objects in an `export_metadata` response. Handles both the
/// bare metadata document and the `{ resource_version, metadata }` wrapper.
fn parse_metadata(raw: &str) -> MetadataCounts {
    let Ok(root) = serde_json::from_str::<Value>(raw) else {
        return MetadataCounts::default();
    };
    let doc = root.get("metadata").unwrap_or(&root);

    let mut counts = MetadataCounts {
        actions: arr_len(doc, "actions"),
        cron_triggers: arr_len(doc, "cron_triggers"),
        remote_schemas: arr_len(doc, "remote_schemas"),
        ..Default::default()
    };
    let Some(sources) = doc.get("sources").and_then(Value::as_array) else {
        return counts;
    };
    for source in sources {
        let Some(tables) = source.get("tables").and_then(Value::as_array) else {
            continue;
        };
        counts.tables += tables.len() as u64;
        for table in tables {
            counts.relationships +=
                arr_len(table, "object_relationships") + arr_len(table, "array_relationships");
            counts.permissions += arr_len(table, "insert_permissions")
                + arr_len(table, "select_permissions")
                + arr_len(table, "update_permissions")
                + arr_len(table, "delete_permissions");
            counts.event_triggers += arr_len(table, "event_triggers");
        }
    }
    counts
}

fn parse_version(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("version").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_inconsistencies(raw: &str) -> Vec<InconsistentObject> {
    let Ok(root) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    root.get("inconsistent_objects")
        .and_then(Value::as_array)
        .map(|objs| {
            objs.iter()
                .map(|o| InconsistentObject {
                    name: str_field(o, "name"),
                    object_type: str_field(o, "type"),
                    reason: str_field(o, "reason"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_metadata_counts_tracked_objects() {
        let raw = r#"{
            "version": 3,
            "sources": [{
                "name": "default",
                "tables": [
                    {
                        "table": {"schema": "public", "name": "users"},
                        "object_relationships": [{"name": "profile"}],
                        "array_relationships": [{"name": "posts"}, {"name": "comments"}],
                        "select_permissions": [{"role": "user"}],
                        "insert_permissions": [{"role": "user"}],
                        "event_triggers": [{"name": "on_insert"}]
                    },
                    {
                        "table": {"schema": "public", "name": "posts"},
                        "select_permissions": [{"role": "user"}, {"role": "editor"}]
                    }
                ]
            }],
            "actions": [{"name": "signup"}],
            "cron_triggers": [],
            "remote_schemas": [{"name": "payments"}]
        }"#;
        let counts = parse_metadata(raw);
        assert_eq!(counts.tables, 2);
        assert_eq!(counts.relationships, 3);
        assert_eq!(counts.permissions, 4);
        assert_eq!(counts.event_triggers, 1);
        assert_eq!(counts.actions, 1);
        assert_eq!(counts.cron_triggers, 0);
        assert_eq!(counts.remote_schemas, 1);
    }

    #[test]
    fn parse_metadata_unwraps_resource_version_envelope() {
        let raw = r#"{"resource_version": 7, "metadata": {"version": 3, "sources": [{"tables": [{"table": {"name": "t"}}]}]}}"#;
        assert_eq!(parse_metadata(raw).tables, 1);
    }

    #[test]
    fn parse_metadata_tolerates_garbage() {
        assert_eq!(parse_metadata("not json"), MetadataCounts::default());
        assert_eq!(parse_metadata("{}"), MetadataCounts::default());
        assert_eq!(parse_metadata(r#"{"sources": "nope"}"#), MetadataCounts::default());
    }

    #[test]
    fn parse_version_reads_version_field() {
        assert_eq!(parse_version(r#"{"version":"v2.36.0"}"#), "v2.36.0");
        assert_eq!(parse_version("503 Service Unavailable"), "unknown");
    }

    #[test]
    fn parse_inconsistencies_maps_objects() {
        let raw = r#"{
            "is_consistent": false,
            "inconsistent_objects": [
                {"name": "table users", "type": "table", "reason": "no such table exists"},
                {"definition": {"x": 1}, "reason": "broken"}
            ]
        }"#;
        let objs = parse_inconsistencies(raw);
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0].name, "table users");
        assert_eq!(objs[0].object_type, "table");
        assert_eq!(objs[1].name, "unknown");
        assert_eq!(objs[1].reason, "broken");
    }

    #[test]
    fn parse_inconsistencies_empty_when_consistent() {
        let raw = r#"{"is_consistent": true, "inconsistent_objects": []}"#;
        assert!(parse_inconsistencies(raw).is_empty());
        assert!(parse_inconsistencies("garbage").is_empty());
    }
}
