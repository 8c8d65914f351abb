//! WebSocket handler for the push channel

use std::collections::HashSet;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::{
    api::{error::ApiResult, state::ApiState, types::StreamQuery},
    hub::Channel,
};

/// WebSocket upgrade handler
///
/// GET /api/stream?channels=network,protocols,alerts
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(params): Query<StreamQuery>,
) -> ApiResult<Response> {
    let channels: HashSet<Channel> = match params.channels.as_deref() {
        Some(list) => Channel::parse_list(list)?,
        None => Channel::ALL.into_iter().collect(),
    };

    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, state, channels)))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState, channels: HashSet<Channel>) {
    let mut events = state.monitor.connect(channels).await;
    let connection_id = events.connection_id();
    info!("WebSocket client {connection_id} connected");

    let (mut sender, mut receiver) = socket.split();
    let hub = state.monitor.hub.clone();
    let send_timeout = state.send_timeout;

    // Forward hub events until the hub drops us
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize {} event: {e}", event.name());
                    continue;
                }
            };

            let sent = match tokio::time::timeout(send_timeout, sender.send(Message::Text(text)))
                .await
            {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("send timed out after {send_timeout:?}")),
            };

            match sent {
                Ok(()) => hub.record_send_success(connection_id),
                Err(e) => {
                    debug!("WebSocket send failed: {e}");
                    if hub.record_send_failure(connection_id) {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    // Drain incoming frames; only close matters
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    // Pong is automatically sent by axum
                    debug!("Received ping");
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.monitor.hub.unsubscribe(connection_id);
    info!("WebSocket client {connection_id} disconnected");
}
