// Model serialization tests (JSON camelCase, wire message tags)

use stackwatch::models::*;

fn sample_container() -> ContainerStats {
    ContainerStats {
        id: "abc123".into(),
        name: "postgres".into(),
        status: ContainerStatus::Running,
        health: HealthStatus::Healthy,
        cpu_percent: 12.5,
        memory: MemoryStats {
            used_gib: 0.52,
            limit_gib: 2.0,
            percent: 26.0,
        },
        network: NetworkIo {
            rx_mib: 10.2,
            tx_mib: 4.8,
        },
        block_io: BlockIo {
            read_mib: 120.0,
            write_mib: 48.5,
        },
        pids: 12,
        restart_count: 1,
        uptime: "Up 3 hours".into(),
    }
}

#[test]
fn test_container_stats_serialization_camel_case() {
    let json = serde_json::to_string(&sample_container()).unwrap();
    assert!(json.contains("\"cpuPercent\""));
    assert!(json.contains("\"blockIo\""));
    assert!(json.contains("\"restartCount\""));
    assert!(json.contains("\"usedGib\""));
    assert!(json.contains("\"status\":\"running\""));
    assert!(json.contains("\"health\":\"healthy\""));
    let back: ContainerStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back, sample_container());
}

#[test]
fn test_container_status_from_runtime_strings() {
    assert_eq!(
        ContainerStatus::from_runtime(Some("running")),
        ContainerStatus::Running
    );
    assert_eq!(
        ContainerStatus::from_runtime(Some("exited")),
        ContainerStatus::Stopped
    );
    assert_eq!(
        ContainerStatus::from_runtime(Some("created")),
        ContainerStatus::Stopped
    );
    assert_eq!(
        ContainerStatus::from_runtime(Some("paused")),
        ContainerStatus::Paused
    );
    assert_eq!(ContainerStatus::from_runtime(None), ContainerStatus::Stopped);
    assert!(ContainerStatus::Running.is_running());
    assert!(!ContainerStatus::Paused.is_running());
}

#[test]
fn test_health_status_from_runtime_strings() {
    assert_eq!(
        HealthStatus::from_runtime(Some("healthy")),
        HealthStatus::Healthy
    );
    assert_eq!(
        HealthStatus::from_runtime(Some("starting")),
        HealthStatus::Starting
    );
    assert_eq!(HealthStatus::from_runtime(Some("none")), HealthStatus::None);
    assert_eq!(HealthStatus::from_runtime(None), HealthStatus::None);
}

#[test]
fn test_zero_live_metrics_keeps_identity() {
    let mut c = sample_container();
    c.zero_live_metrics();
    assert_eq!(c.id, "abc123");
    assert_eq!(c.restart_count, 1);
    assert_eq!(c.cpu_percent, 0.0);
    assert_eq!(c.memory, MemoryStats::default());
    assert_eq!(c.pids, 0);
}

#[test]
fn test_service_snapshots_default_to_stopped() {
    let services = ServiceSnapshots::default();
    assert_eq!(services.database.status, ServiceStatus::Stopped);
    assert_eq!(services.graphql.status, ServiceStatus::Stopped);
    assert_eq!(services.cache.status, ServiceStatus::Stopped);
    assert!(!services.all_healthy());

    let json = serde_json::to_string(&services).unwrap();
    assert!(json.contains("\"totalSizeMib\""));
    assert!(json.contains("\"hitRatePercent\""));
    assert!(json.contains("\"inconsistentObjects\""));
    assert!(json.contains("\"status\":\"stopped\""));
}

#[test]
fn test_global_state_serialization() {
    let mut state = GlobalState::default();
    state.containers.push(sample_container());
    state.runtime.engine_version = "27.1.1".into();
    state.last_update = 1_700_000_000_000;

    let json = serde_json::to_string(&state).unwrap();
    assert!(json.contains("\"lastUpdate\""));
    assert!(json.contains("\"engineVersion\":\"27.1.1\""));
    assert!(json.contains("\"runningContainers\""));
    let back: GlobalState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.containers.len(), 1);
    assert!(back.container("abc123").is_some());
    assert!(back.container("nope").is_none());
}

#[test]
fn test_stream_message_tags() {
    let cases: Vec<(StreamMessage, &str)> = vec![
        (
            StreamMessage::Initial {
                state: GlobalState::default(),
            },
            "initial",
        ),
        (
            StreamMessage::State {
                state: GlobalState::default(),
            },
            "state",
        ),
        (
            StreamMessage::DockerEvent {
                event: RuntimeEvent {
                    action: "die".into(),
                    container_id: "abc".into(),
                    container_name: "postgres".into(),
                    timestamp: 1_700_000_000,
                },
            },
            "dockerEvent",
        ),
        (
            StreamMessage::ServiceUpdate {
                service: ServiceKind::Cache,
                snapshot: ServiceSnapshot::Cache(CacheSnapshot::degraded(ServiceStatus::Stopped)),
            },
            "serviceUpdate",
        ),
        (StreamMessage::Ping { timestamp: 123 }, "ping"),
    ];
    for (msg, tag) in cases {
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], tag, "tag for {msg:?}");
    }
}

#[test]
fn test_service_update_flattens_snapshot_shape() {
    let msg = StreamMessage::ServiceUpdate {
        service: ServiceKind::Database,
        snapshot: ServiceSnapshot::Database(DatabaseSnapshot::degraded(ServiceStatus::Unhealthy)),
    };
    let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["service"], "database");
    assert_eq!(value["snapshot"]["status"], "unhealthy");
    assert_eq!(value["snapshot"]["activeConnections"], 0);
}

#[test]
fn test_runtime_event_serialization() {
    let event = RuntimeEvent {
        action: "health_status: unhealthy".into(),
        container_id: "abc".into(),
        container_name: "hasura".into(),
        timestamp: 1_700_000_000,
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"containerId\""));
    assert!(json.contains("\"containerName\""));
    let back: RuntimeEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
