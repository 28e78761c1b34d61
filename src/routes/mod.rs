// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use bollard::Docker;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::broadcaster::Broadcaster;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) docker: Docker,
}

pub fn app(
    orchestrator: Arc<Orchestrator>,
    broadcaster: Arc<Broadcaster>,
    docker: Docker,
) -> Router {
    let state = AppState {
        orchestrator,
        broadcaster,
        docker,
    };
    Router::new()
        .route("/", get(|| async { "stackwatch: local stack telemetry" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/state", get(http::state_handler)) // GET /api/state
        .route("/api/refresh", post(http::refresh_handler)) // POST /api/refresh
        .route("/api/containers/batch", post(http::batch_action_handler)) // POST /api/containers/batch
        .route(
            "/api/containers/{id}/{action}",
            post(http::container_action_handler),
        ) // POST /api/containers/{id}/{action}
        .route("/ws/state", get(ws::ws_state)) // WS /ws/state
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
