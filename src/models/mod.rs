// Domain models

mod container;
mod message;
mod service;
mod state;

pub use container::{
    BlockIo, ContainerStats, ContainerStatus, HealthStatus, MemoryStats, NetworkIo,
};
pub use message::{RuntimeEvent, StreamMessage};
pub use service::{
    CacheSnapshot, DatabaseSize, DatabaseSnapshot, GraphqlSnapshot, InconsistentObject,
    KeyspaceInfo, ServiceKind, ServiceSnapshot, ServiceSnapshots, ServiceStatus,
};
pub use state::{AggregateMetrics, GlobalState, RuntimeSummary};
