// Wire messages pushed to subscribers

use serde::{Deserialize, Serialize};

use super::{GlobalState, ServiceKind, ServiceSnapshot};

/// One container lifecycle event passed through from the engine, untouched
/// apart from flattening into a stable wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvent {
    pub action: String,
    pub container_id: String,
    pub container_name: String,
    /// Engine-reported event time, epoch seconds.
    pub timestamp: i64,
}

/// Messages delivered over a subscription, one JSON text frame each.
/// `initial` arrives once on connect; `state` on every upstream change;
/// `dockerEvent`/`serviceUpdate` pass a single upstream event through for
/// fine-grained reactions; `ping` keeps the connection warm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    Initial { state: GlobalState },
    State { state: GlobalState },
    DockerEvent { event: RuntimeEvent },
    ServiceUpdate {
        service: ServiceKind,
        snapshot: ServiceSnapshot,
    },
    Ping { timestamp: u64 },
}
