use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub services: ServicesConfig,
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Fixed delay before the lifecycle-event stream reconnects after an error.
    #[serde(default = "default_event_backoff_secs")]
    pub event_backoff_secs: u64,
}

fn default_event_backoff_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    pub database: DatabaseServiceConfig,
    pub graphql: GraphqlServiceConfig,
    pub cache: CacheServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseServiceConfig {
    /// Name of the container running the database server.
    pub container: String,
    pub user: String,
    pub interval_ms: u64,
    pub ttl_ms: u64,
    pub timeout_ms: u64,
    /// A query counts as slow once it has been running longer than this.
    pub slow_query_secs: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlServiceConfig {
    pub container: String,
    pub interval_ms: u64,
    pub ttl_ms: u64,
    pub timeout_ms: u64,
    /// Admin secret sent with metadata requests when the engine requires one.
    #[serde(default)]
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheServiceConfig {
    pub container: String,
    pub interval_ms: u64,
    pub ttl_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of state events kept in the orchestrator's notification
    /// channel (slow bridge consumers may lag).
    pub broadcast_capacity: usize,
    /// Per-subscriber outgoing message buffer.
    pub subscriber_buffer: usize,
    pub keepalive_interval_secs: u64,
    /// Subscribers with no successful delivery for this long are dropped.
    pub stale_after_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.runtime.event_backoff_secs > 0,
            "runtime.event_backoff_secs must be > 0, got {}",
            self.runtime.event_backoff_secs
        );
        for (section, container) in [
            ("services.database", &self.services.database.container),
            ("services.graphql", &self.services.graphql.container),
            ("services.cache", &self.services.cache.container),
        ] {
            anyhow::ensure!(
                !container.is_empty(),
                "{}.container must be non-empty",
                section
            );
        }
        anyhow::ensure!(
            !self.services.database.user.is_empty(),
            "services.database.user must be non-empty"
        );
        anyhow::ensure!(
            self.services.database.slow_query_secs > 0,
            "services.database.slow_query_secs must be > 0, got {}",
            self.services.database.slow_query_secs
        );
        for (section, interval, ttl, timeout) in [
            (
                "services.database",
                self.services.database.interval_ms,
                self.services.database.ttl_ms,
                self.services.database.timeout_ms,
            ),
            (
                "services.graphql",
                self.services.graphql.interval_ms,
                self.services.graphql.ttl_ms,
                self.services.graphql.timeout_ms,
            ),
            (
                "services.cache",
                self.services.cache.interval_ms,
                self.services.cache.ttl_ms,
                self.services.cache.timeout_ms,
            ),
        ] {
            anyhow::ensure!(
                interval > 0,
                "{}.interval_ms must be > 0, got {}",
                section,
                interval
            );
            anyhow::ensure!(ttl > 0, "{}.ttl_ms must be > 0, got {}", section, ttl);
            anyhow::ensure!(
                timeout > 0,
                "{}.timeout_ms must be > 0, got {}",
                section,
                timeout
            );
        }
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.publishing.subscriber_buffer > 0,
            "publishing.subscriber_buffer must be > 0, got {}",
            self.publishing.subscriber_buffer
        );
        anyhow::ensure!(
            self.publishing.keepalive_interval_secs > 0,
            "publishing.keepalive_interval_secs must be > 0, got {}",
            self.publishing.keepalive_interval_secs
        );
        anyhow::ensure!(
            self.publishing.stale_after_secs > 0,
            "publishing.stale_after_secs must be > 0, got {}",
            self.publishing.stale_after_secs
        );
        Ok(())
    }
}
