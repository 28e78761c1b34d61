// WebSocket handler streaming the fused state to one subscriber

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::broadcaster::Subscription;

pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_state(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| async move {
        let sub = broadcaster.create_subscription().await;
        if let Err(e) = stream_state(socket, sub).await {
            tracing::info!("State stream error: {}", e);
        }
    })
}

/// Drains the subscription into the socket, one JSON text frame per
/// message. Ends when the peer stops accepting frames or the subscription
/// is torn down upstream; dropping the subscription unregisters it.
async fn stream_state(mut socket: WebSocket, mut sub: Subscription) -> anyhow::Result<()> {
    tracing::info!("Client connected to state stream");
    while let Some(msg) = sub.recv().await {
        let json = serde_json::to_string(&msg)?;
        let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
        if r.is_err() || r.unwrap_or(Ok(())).is_err() {
            break;
        }
    }
    Ok(())
}
