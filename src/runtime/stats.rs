// Process raw runtime stats samples into live metric readings.

use crate::models::{BlockIo, MemoryStats, NetworkIo};
use bollard::models::ContainerStatsResponse;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Readings derived from one stats sample. Inventory fields (status, health,
/// restart count, uptime) come from inspection and are merged by the collector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveMetrics {
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub network: NetworkIo,
    pub block_io: BlockIo,
    pub pids: u64,
}

/// Process a raw stats sample into live metrics. Exposed for unit tests.
pub(crate) fn live_metrics(s: &ContainerStatsResponse) -> Option<LiveMetrics> {
    let cpu_stats = s.cpu_stats.as_ref()?;
    let precpu_stats = s.precpu_stats.as_ref()?;

    let cpu_usage = cpu_stats.cpu_usage.as_ref()?;
    let precpu_usage = precpu_stats.cpu_usage.as_ref()?;

    let cpu_delta =
        cpu_usage.total_usage.unwrap_or(0) as i64 - precpu_usage.total_usage.unwrap_or(0) as i64;
    let system_delta = cpu_stats.system_cpu_usage.unwrap_or(0) as i64
        - precpu_stats.system_cpu_usage.unwrap_or(0) as i64;
    let online = cpu_stats.online_cpus.unwrap_or(1) as f64;
    // Counter resets can make the delta negative; report that as idle.
    let cpu_percent = if system_delta > 0 && online > 0.0 {
        round1(((cpu_delta as f64 / system_delta as f64) * online * 100.0).max(0.0))
    } else {
        0.0
    };

    let mem_usage = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let mem_limit = s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);
    let memory_percent = if mem_limit > 0 {
        (mem_usage as f64 / mem_limit as f64 * 100.0).round()
    } else {
        0.0
    };

    let (network_rx, network_tx) = s.networks.as_ref().map_or((0u64, 0u64), |n| {
        let mut rx_bytes = 0u64;
        let mut tx_bytes = 0u64;
        for v in n.values() {
            rx_bytes += v.rx_bytes.unwrap_or(0);
            tx_bytes += v.tx_bytes.unwrap_or(0);
        }
        (rx_bytes, tx_bytes)
    });

    let (block_read, block_write) = s
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref())
        .map_or((0u64, 0u64), |b| {
            let mut read = 0u64;
            let mut write = 0u64;
            for e in b {
                if e.op
                    .as_ref()
                    .is_some_and(|op| op.eq_ignore_ascii_case("read"))
                {
                    read += e.value.unwrap_or(0);
                } else if e
                    .op
                    .as_ref()
                    .is_some_and(|op| op.eq_ignore_ascii_case("write"))
                {
                    write += e.value.unwrap_or(0);
                }
            }
            (read, write)
        });

    let pids = s.pids_stats.as_ref().and_then(|p| p.current).unwrap_or(0);

    Some(LiveMetrics {
        cpu_percent,
        memory: MemoryStats {
            used_gib: round2(mem_usage as f64 / GIB),
            limit_gib: round2(mem_limit as f64 / GIB),
            percent: memory_percent,
        },
        network: NetworkIo {
            rx_mib: round1(network_rx as f64 / MIB),
            tx_mib: round1(network_tx as f64 / MIB),
        },
        block_io: BlockIo {
            read_mib: round1(block_read as f64 / MIB),
            write_mib: round1(block_write as f64 / MIB),
        },
        pids,
    })
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerBlkioStatEntry, ContainerBlkioStats, ContainerCpuStats, ContainerCpuUsage,
        ContainerMemoryStats, ContainerNetworkStats, ContainerPidsStats, ContainerStatsResponse,
    };
    use std::collections::HashMap;

    fn minimal_cpu_stats(total_usage: u64, system_cpu_usage: u64) -> ContainerCpuStats {
        ContainerCpuStats {
            cpu_usage: Some(ContainerCpuUsage {
                total_usage: Some(total_usage),
                ..Default::default()
            }),
            system_cpu_usage: Some(system_cpu_usage),
            online_cpus: Some(2),
            throttling_data: None,
        }
    }

    #[test]
    fn live_metrics_returns_none_when_cpu_stats_missing() {
        let s = ContainerStatsResponse {
            cpu_stats: None,
            precpu_stats: Some(minimal_cpu_stats(0, 0)),
            ..Default::default()
        };
        assert!(live_metrics(&s).is_none());
    }

    #[test]
    fn live_metrics_returns_none_when_precpu_stats_missing() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100, 1000)),
            precpu_stats: None,
            ..Default::default()
        };
        assert!(live_metrics(&s).is_none());
    }

    #[test]
    fn live_metrics_computes_cpu_memory_and_io() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100_000_000, 1_000_000_000)),
            precpu_stats: Some(minimal_cpu_stats(50_000_000, 500_000_000)),
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(1_610_612_736),
                limit: Some(4_294_967_296),
                ..Default::default()
            }),
            networks: Some({
                let mut m = HashMap::new();
                m.insert(
                    "eth0".to_string(),
                    ContainerNetworkStats {
                        rx_bytes: Some(5 * 1024 * 1024),
                        tx_bytes: Some(1_310_720),
                        ..Default::default()
                    },
                );
                m
            }),
            pids_stats: Some(ContainerPidsStats {
                current: Some(5),
                ..Default::default()
            }),
            blkio_stats: Some(ContainerBlkioStats {
                io_service_bytes_recursive: Some(vec![
                    ContainerBlkioStatEntry {
                        op: Some("read".to_string()),
                        value: Some(512 * 1024),
                        ..Default::default()
                    },
                    ContainerBlkioStatEntry {
                        op: Some("write".to_string()),
                        value: Some(2 * 1024 * 1024),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let out = live_metrics(&s).unwrap();
        // cpu_delta 50M / system_delta 500M * 2 cpus * 100 = 20.0
        assert!((out.cpu_percent - 20.0).abs() < 0.01);
        assert_eq!(out.memory.used_gib, 1.5);
        assert_eq!(out.memory.limit_gib, 4.0);
        assert_eq!(out.memory.percent, 38.0);
        assert_eq!(out.network.rx_mib, 5.0);
        assert_eq!(out.network.tx_mib, 1.3);
        assert_eq!(out.block_io.read_mib, 0.5);
        assert_eq!(out.block_io.write_mib, 2.0);
        assert_eq!(out.pids, 5);
    }

    #[test]
    fn live_metrics_sums_networks_across_interfaces() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100, 1000)),
            precpu_stats: Some(minimal_cpu_stats(50, 500)),
            networks: Some({
                let mut m = HashMap::new();
                for (iface, rx) in [("eth0", 1024 * 1024), ("eth1", 2 * 1024 * 1024)] {
                    m.insert(
                        iface.to_string(),
                        ContainerNetworkStats {
                            rx_bytes: Some(rx),
                            tx_bytes: Some(rx),
                            ..Default::default()
                        },
                    );
                }
                m
            }),
            ..Default::default()
        };
        let out = live_metrics(&s).unwrap();
        assert_eq!(out.network.rx_mib, 3.0);
        assert_eq!(out.network.tx_mib, 3.0);
    }

    #[test]
    fn live_metrics_zero_system_delta_returns_zero_cpu_percent() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100, 500)),
            precpu_stats: Some(minimal_cpu_stats(50, 500)),
            ..Default::default()
        };
        let out = live_metrics(&s).unwrap();
        assert_eq!(out.cpu_percent, 0.0);
    }

    #[test]
    fn live_metrics_clamps_negative_cpu_delta_to_zero() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100, 1000)),
            precpu_stats: Some(minimal_cpu_stats(200, 500)),
            ..Default::default()
        };
        let out = live_metrics(&s).unwrap();
        assert_eq!(out.cpu_percent, 0.0);
    }

    #[test]
    fn live_metrics_missing_memory_limit_reports_zero_percent() {
        let s = ContainerStatsResponse {
            cpu_stats: Some(minimal_cpu_stats(100, 1000)),
            precpu_stats: Some(minimal_cpu_stats(50, 500)),
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(1024 * 1024 * 1024),
                limit: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let out = live_metrics(&s).unwrap();
        assert_eq!(out.memory.used_gib, 1.0);
        assert_eq!(out.memory.limit_gib, 0.0);
        assert_eq!(out.memory.percent, 0.0);
    }
}
