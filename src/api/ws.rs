use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::api::server::AppState;
use crate::hub::{BroadcastHub, ClientMessage, Outbound, ServerMessage};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Runs for the lifetime of one observer connection. The writer drains the
/// connection's hub queue; the reader applies control frames. Whichever ends
/// first takes the other down with it.
async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (id, mut outbound) = hub.connect().await;
    let (mut sender, mut receiver) = socket.split();
    log::info!("Observer {} connected", id);

    let mut send_task = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("Failed to serialize {:?} frame: {}", message.kind, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_hub = Arc::clone(&hub);
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                    Ok(message) => reader_hub.handle_client_message(id, message).await,
                    Err(reason) => {
                        reader_hub.send_to(id, ServerMessage::error(reason)).await;
                    }
                },
                Ok(Message::Pong(_)) => reader_hub.record_pong(id).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Observer {} receive error: {}", id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(id).await;
    log::info!("Observer {} disconnected", id);
}
