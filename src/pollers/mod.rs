// Backing-service pollers. Each runs diagnostic commands inside its
// service's container and produces a snapshot that never errors: a stopped
// container reports `stopped`, failed diagnostics report `unhealthy`.

mod cache;
mod database;
mod exec;
mod graphql;

pub use cache::CachePoller;
pub use database::DatabasePoller;
pub use graphql::GraphqlPoller;

use bollard::Docker;
use bollard::query_parameters::InspectContainerOptions;
use std::time::{Duration, Instant};

/// Cached value if the last successful collection is still within `ttl`.
pub(crate) fn fresh<T: Clone>(slot: &Option<(Instant, T)>, ttl: Duration) -> Option<T> {
    slot.as_ref()
        .filter(|(at, _)| at.elapsed() < ttl)
        .map(|(_, v)| v.clone())
}

/// Whether the backing container currently reports a running state. An
/// unreachable engine reads as not running.
pub(crate) async fn container_running(docker: &Docker, container: &str) -> bool {
    match docker
        .inspect_container(container, Option::<InspectContainerOptions>::None)
        .await
    {
        Ok(inspect) => inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false),
        Err(_) => false,
    }
}
