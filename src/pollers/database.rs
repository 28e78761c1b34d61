// PostgreSQL diagnostics via psql inside the database container.

use crate::config::DatabaseServiceConfig;
use crate::models::{DatabaseSize, DatabaseSnapshot, ServiceStatus};
use crate::runtime::stats::round1;
use bollard::Docker;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use super::exec;

const ACTIVITY_SQL: &str = "SELECT count(*) FILTER (WHERE state = 'active'), \
    count(*) FILTER (WHERE state = 'idle'), \
    (SELECT setting::bigint FROM pg_settings WHERE name = 'max_connections') \
    FROM pg_stat_activity";
const SIZES_SQL: &str = "SELECT datname, pg_database_size(datname) FROM pg_database \
    WHERE datistemplate = false ORDER BY datname";
const PERFORMANCE_SQL: &str = "SELECT sum(blks_hit), sum(blks_read), \
    sum(xact_commit + xact_rollback) FROM pg_stat_database";

pub struct DatabasePoller {
    docker: Docker,
    cfg: DatabaseServiceConfig,
    cache: Mutex<Option<(Instant, DatabaseSnapshot)>>,
    /// Cumulative transaction total at the previous poll, for the tx/sec rate.
    last_transactions: Mutex<Option<(Instant, u64)>>,
}

impl DatabasePoller {
    pub fn new(docker: Docker, cfg: DatabaseServiceConfig) -> Self {
        Self {
            docker,
            cfg,
            cache: Mutex::new(None),
            last_transactions: Mutex::new(None),
        }
    }

    /// Current database snapshot. Holding the cache lock for the whole poll
    /// serializes concurrent callers; within the TTL window the previous
    /// successful snapshot is returned without touching the container.
    pub async fn collect(&self) -> DatabaseSnapshot {
        let mut cache = self.cache.lock().await;
        if let Some(snap) = super::fresh(&cache, Duration::from_millis(self.cfg.ttl_ms)) {
            return snap;
        }
        if !super::container_running(&self.docker, &self.cfg.container).await {
            return DatabaseSnapshot::degraded(ServiceStatus::Stopped);
        }
        let snap = self.poll().await;
        if snap.status == ServiceStatus::Healthy {
            *cache = Some((Instant::now(), snap.clone()));
        }
        snap
    }

    async fn poll(&self) -> DatabaseSnapshot {
        let limit = Duration::from_millis(self.cfg.timeout_ms);

        // Connection activity is the primary diagnostic; without it the
        // whole snapshot reads unhealthy.
        let activity = match self.query(ACTIVITY_SQL, limit).await {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "database activity query failed");
                return DatabaseSnapshot::degraded(ServiceStatus::Unhealthy);
            }
        };
        let (active_connections, idle_connections, max_connections) = parse_activity(&activity);
        let connection_percent = if max_connections > 0 {
            round1(
                (active_connections + idle_connections) as f64 / max_connections as f64 * 100.0,
            )
        } else {
            0.0
        };

        let (databases, total_size_mib) = match self.query(SIZES_SQL, limit).await {
            Ok(out) => parse_sizes(&out),
            Err(e) => {
                warn!(error = %e, "database size query failed");
                (Vec::new(), 0.0)
            }
        };

        let queries_sql = format!(
            "SELECT count(*) FILTER (WHERE state = 'active' AND pid <> pg_backend_pid()), \
            count(*) FILTER (WHERE state = 'active' AND pid <> pg_backend_pid() \
            AND now() - query_start > interval '{} seconds') FROM pg_stat_activity",
            self.cfg.slow_query_secs
        );
        let (active_queries, slow_queries) = match self.query(&queries_sql, limit).await {
            Ok(out) => parse_counts(&out),
            Err(e) => {
                warn!(error = %e, "database query-count query failed");
                (0, 0)
            }
        };

        let (cache_hit_percent, transactions_per_sec) =
            match self.query(PERFORMANCE_SQL, limit).await {
                Ok(out) => {
                    let (hit_percent, total) = parse_performance(&out);
                    (hit_percent, self.transaction_rate(total).await)
                }
                Err(e) => {
                    warn!(error = %e, "database performance query failed");
                    (0.0, 0.0)
                }
            };

        DatabaseSnapshot {
            status: ServiceStatus::Healthy,
            active_connections,
            idle_connections,
            max_connections,
            connection_percent,
            databases,
            total_size_mib,
            active_queries,
            slow_queries,
            cache_hit_percent,
            transactions_per_sec,
        }
    }

    /// Tx/sec from the delta against the previous poll's cumulative total.
    /// The first poll, a counter reset and a zero elapsed window all report 0.
    async fn transaction_rate(&self, total: u64) -> f64 {
        let mut last = self.last_transactions.lock().await;
        let rate = match *last {
            Some((at, prev)) if total >= prev => {
                let secs = at.elapsed().as_secs_f64();
                if secs > 0.0 {
                    round1((total - prev) as f64 / secs)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        *last = Some((Instant::now(), total));
        rate
    }

    async fn query(&self, sql: &str, limit: Duration) -> anyhow::Result<String> {
        let cmd = vec![
            "psql".to_string(),
            "-U".to_string(),
            self.cfg.user.clone(),
            "-t".to_string(),
            "-A".to_string(),
            "-F|".to_string(),
            "-c".to_string(),
            sql.to_string(),
        ];
        exec::exec_capture(&self.docker, &self.cfg.container, cmd, limit).await
    }
}

/// First non-empty line of `psql -t -A` output, split on the field separator.
fn fields(out: &str) -> Vec<&str> {
    out.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.split('|').collect())
        .unwrap_or_default()
}

fn num(fields: &[&str], idx: usize) -> u64 {
    fields
        .get(idx)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn parse_activity(out: &str) -> (u64, u64, u64) {
    let f = fields(out);
    (num(&f, 0), num(&f, 1), num(&f, 2))
}

fn parse_sizes(out: &str) -> (Vec<DatabaseSize>, f64) {
    let mut databases = Vec::new();
    let mut total = 0.0;
    for line in out.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('|');
        let (Some(name), Some(size)) = (parts.next(), parts.next()) else {
            continue;
        };
        let bytes: u64 = size.trim().parse().unwrap_or(0);
        let size_mib = round1(bytes as f64 / (1024.0 * 1024.0));
        total += size_mib;
        databases.push(DatabaseSize {
            name: name.trim().to_string(),
            size_mib,
        });
    }
    (databases, round1(total))
}

fn parse_counts(out: &str) -> (u64, u64) {
    let f = fields(out);
    (num(&f, 0), num(&f, 1))
}

/// Returns the buffer cache hit percent and the cumulative transaction total.
fn parse_performance(out: &str) -> (f64, u64) {
    let f = fields(out);
    let hits = num(&f, 0);
    let reads = num(&f, 1);
    let total = num(&f, 2);
    let hit_percent = if hits + reads > 0 {
        round1(hits as f64 / (hits + reads) as f64 * 100.0)
    } else {
        0.0
    };
    (hit_percent, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseServiceConfig;
    use bollard::Docker;

    fn poller() -> DatabasePoller {
        let docker = Docker::connect_with_unix_defaults().unwrap();
        DatabasePoller::new(
            docker,
            DatabaseServiceConfig {
                container: "db".to_string(),
                user: "postgres".to_string(),
                interval_ms: 10_000,
                ttl_ms: 5_000,
                timeout_ms: 3_000,
                slow_query_secs: 2,
            },
        )
    }

    #[test]
    fn parse_activity_reads_connection_counts() {
        assert_eq!(parse_activity("3|12|100\n"), (3, 12, 100));
    }

    #[test]
    fn parse_activity_tolerates_garbage() {
        assert_eq!(parse_activity("ERROR: whatever"), (0, 0, 0));
        assert_eq!(parse_activity(""), (0, 0, 0));
        assert_eq!(parse_activity("1|not-a-number|"), (1, 0, 0));
    }

    #[test]
    fn parse_sizes_converts_bytes_to_mib() {
        let out = "appdb|15728640\npostgres|8388608\n";
        let (dbs, total) = parse_sizes(out);
        assert_eq!(dbs.len(), 2);
        assert_eq!(dbs[0].name, "appdb");
        assert_eq!(dbs[0].size_mib, 15.0);
        assert_eq!(dbs[1].size_mib, 8.0);
        assert_eq!(total, 23.0);
    }

    #[test]
    fn parse_sizes_skips_malformed_lines() {
        let (dbs, total) = parse_sizes("only-one-field\nappdb|1048576\n");
        assert_eq!(dbs.len(), 1);
        assert_eq!(total, 1.0);
    }

    #[test]
    fn parse_counts_reads_query_counts() {
        assert_eq!(parse_counts("4|1\n"), (4, 1));
    }

    #[test]
    fn parse_performance_computes_hit_percent() {
        let (hit, total) = parse_performance("900|100|5000\n");
        assert_eq!(hit, 90.0);
        assert_eq!(total, 5000);
    }

    #[test]
    fn parse_performance_zero_reads_is_zero_percent() {
        let (hit, total) = parse_performance("0|0|0\n");
        assert_eq!(hit, 0.0);
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn collect_reports_stopped_when_container_is_absent() {
        let docker = Docker::connect_with_unix_defaults().unwrap();
        let p = DatabasePoller::new(
            docker,
            DatabaseServiceConfig {
                container: "no-such-container-stackwatch".to_string(),
                user: "postgres".to_string(),
                interval_ms: 10_000,
                ttl_ms: 5_000,
                timeout_ms: 1_000,
                slow_query_secs: 2,
            },
        );
        // Works with or without an engine: an inspect error and a 404 both
        // read as not running.
        let snap = p.collect().await;
        assert_eq!(snap.status, ServiceStatus::Stopped);
        assert_eq!(snap.active_connections, 0);
    }

    #[tokio::test]
    async fn collect_returns_cached_snapshot_within_ttl() {
        let p = poller();
        let mut seeded = DatabaseSnapshot::degraded(ServiceStatus::Healthy);
        seeded.active_connections = 9;
        *p.cache.lock().await = Some((Instant::now(), seeded.clone()));

        let snap = p.collect().await;
        assert_eq!(snap, seeded);
    }

    #[tokio::test]
    async fn transaction_rate_first_poll_is_zero() {
        let p = poller();
        assert_eq!(p.transaction_rate(1000).await, 0.0);
        assert!(p.transaction_rate(2000).await > 0.0);
    }

    #[tokio::test]
    async fn transaction_rate_counter_reset_is_zero() {
        let p = poller();
        let _ = p.transaction_rate(5000).await;
        assert_eq!(p.transaction_rate(100).await, 0.0);
    }
}
