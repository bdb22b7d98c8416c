//! WebSocket task streaming.
//!
//! Clients subscribe to task ids and receive `task_update` events while the
//! task runs and a final `task_result` at the terminal transition. A failed
//! send drops the connection (and with it every subscription it held).

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::coordinator::{TaskEvent, TaskEventKind, TaskState};
use crate::server::routes::AppState;

/// Client → server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { task_id: Uuid },
    Unsubscribe { task_id: Uuid },
    Ping,
}

/// Server → client messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    TaskUpdate {
        task_id: Uuid,
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    TaskResult {
        task_id: Uuid,
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
}

impl ServerMessage {
    fn from_event(event: &TaskEvent) -> Self {
        match event.kind {
            TaskEventKind::TaskUpdate => ServerMessage::TaskUpdate {
                task_id: event.task_id,
                state: event.state,
                message: event.message.clone(),
            },
            TaskEventKind::TaskResult => ServerMessage::TaskResult {
                task_id: event.task_id,
                state: event.state,
                response: event.response.clone(),
                error: event.error.clone(),
            },
        }
    }
}

/// GET /v1/ws — upgrade and run the subscription loop.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.app.coordinator.subscribe();
    let mut subscriptions: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { task_id }) => {
                        subscriptions.insert(task_id);
                        tracing::debug!(task_id = %task_id, "ws subscribed");
                        None
                    }
                    Ok(ClientMessage::Unsubscribe { task_id }) => {
                        subscriptions.remove(&task_id);
                        None
                    }
                    Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
                    Err(e) => Some(ServerMessage::Error {
                        code: "bad_message".to_string(),
                        message: e.to_string(),
                    }),
                };

                if let Some(reply) = reply {
                    if send(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) if subscriptions.contains(&event.task_id) => {
                        let message = ServerMessage::from_event(&event);
                        if send(&mut socket, &message).await.is_err() {
                            // Failed send: drop this subscriber.
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ws subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("server messages serialize");
    socket.send(Message::Text(text)).await
}
