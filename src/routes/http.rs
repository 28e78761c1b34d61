// JSON handlers: version, state, refresh, container control

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use crate::control::{self, BatchRequest, ContainerAction};
use crate::version::{NAME, VERSION};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/state — the current fused stack state.
pub(super) async fn state_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.orchestrator.state().await.as_ref().clone())
}

/// POST /api/refresh — reload the inventory, re-poll every service and
/// answer with the state that includes all of it; 503 while the pipeline
/// is not running.
pub(super) async fn refresh_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.refresh().await {
        Ok(fresh) => axum::Json(fresh.as_ref().clone()).into_response(),
        Err(e) => {
            tracing::warn!("Refresh rejected: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// POST /api/containers/{id}/{action} — engine control passthrough.
/// Returns 204 on success, 404 for an unknown container.
pub(super) async fn container_action_handler(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, ContainerAction)>,
) -> impl IntoResponse {
    match control::apply(&state.docker, &id, action).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) if control::is_not_found(&e) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!("Failed to {} container {}: {}", action.as_str(), id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// POST /api/containers/batch — one action over several ids, applied
/// concurrently; every id reports its own outcome.
pub(super) async fn batch_action_handler(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<BatchRequest>,
) -> impl IntoResponse {
    let outcomes = control::apply_batch(&state.docker, req.action, &req.ids).await;
    axum::Json(outcomes)
}
