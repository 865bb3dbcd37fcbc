//! Viewer side: one WebSocket per browser.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use dbgp_bridge_core::viewer::ViewerEvent;
use dbgp_bridge_core::{Bridge, ViewerAttachment};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

pub async fn ws_handler(State(bridge): State<Arc<Bridge>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_viewer(socket, bridge))
}

/// Replays the snapshot, then relays broadcast events out and viewer commands
/// in until the socket closes.
async fn serve_viewer(socket: WebSocket, bridge: Arc<Bridge>) {
    let ViewerAttachment {
        viewer_id,
        replay,
        mut events,
    } = bridge.connect_viewer().await;
    let (mut sender, mut receiver) = socket.split();

    for message in replay {
        if sender.send(Message::Text(message)).await.is_err() {
            tracing::info!("Viewer {} left during replay", viewer_id);
            return;
        }
    }

    loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = bridge.handle_viewer_message(&text).await {
                        // Only the sender hears about its own mistakes.
                        let reply = ViewerEvent::ReplError(e.to_string()).to_json();
                        if sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Viewer {} socket error: {}", viewer_id, e);
                    break;
                }
            },
            outbound = events.recv() => match outbound {
                Ok(message) => {
                    if sender.send(Message::Text(message.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Viewer {} lagged, skipped {} events", viewer_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Viewer {} disconnected", viewer_id);
}
