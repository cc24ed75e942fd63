//! Per-user WebSocket room bridging clients to the signaling bus

use super::invitation_handler::AppState;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::SignalingMessage;
use crate::infrastructure::signaling::SignalingHandler;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Forwards bus deliveries to the socket's send task
struct RoomForwarder {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

#[async_trait]
impl SignalingHandler for RoomForwarder {
    async fn handle(&self, message: SignalingMessage) {
        if self.tx.send(message).is_err() {
            debug!("Room closed; message discarded");
        }
    }
}

/// WebSocket handler for `/rooms/:user_id`
pub async fn room_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let user_id = UserId::new(user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = state
        .bus
        .subscribe(user_id.clone(), Arc::new(RoomForwarder { tx }));

    info!(user_id = %user_id, "Room client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("Failed to send signaling message to room client");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize signaling message: {}", e);
                }
            }
        }
    });

    let bus = state.bus.clone();
    let room_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let message: SignalingMessage = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(user_id = %room_user, "Invalid signaling frame: {}", e);
                            continue;
                        }
                    };
                    if message.sender_id != room_user {
                        warn!(user_id = %room_user, sender = %message.sender_id, "Rejecting frame sent on behalf of another user");
                        continue;
                    }
                    if let Err(e) = bus.publish(message) {
                        warn!(user_id = %room_user, "Publish failed: {}", e);
                        break;
                    }
                }
                Message::Close(_) => {
                    debug!("Received close message");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    subscription.unsubscribe().await;
    info!(user_id = %user_id, "Room client disconnected");
}
