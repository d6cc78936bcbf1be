//! WebSocket channels: live serial traffic and port hot-plug updates.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::handlers::serial::write_text;
use super::state::AppState;
use crate::events::BridgeEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SerialClientMessage {
    Write {
        payload: String,
        #[serde(default, rename = "appendNewline")]
        append_newline: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PortsClientMessage {
    GetPorts,
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Error { message: String },
    Pong,
}

fn to_text<T: Serialize>(message: &T) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            log::error!("Cannot encode websocket message: {}", e);
            None
        }
    }
}

pub async fn serial_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serial_socket(socket, state))
}

pub async fn ports_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| ports_socket(socket, state))
}

/// Outcome of forwarding one hub event to a client.
enum Forward {
    Continue,
    Stop,
}

async fn forward_event(socket: &mut WebSocket, event: Result<BridgeEvent, RecvError>, client: Uuid) -> Forward {
    match event {
        Ok(event) => {
            if let Some(message) = to_text(&event) {
                if socket.send(message).await.is_err() {
                    return Forward::Stop;
                }
            }
            Forward::Continue
        }
        Err(RecvError::Lagged(skipped)) => {
            log::warn!("Client {} lagging, {} events dropped", client, skipped);
            Forward::Continue
        }
        Err(RecvError::Closed) => Forward::Stop,
    }
}

async fn serial_socket(mut socket: WebSocket, state: AppState) {
    let client = Uuid::new_v4();
    let mut events: broadcast::Receiver<BridgeEvent> = state.events.subscribe_serial();
    log::info!("Serial stream client {} connected", client);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let reply = match serde_json::from_str::<SerialClientMessage>(text.as_str()) {
                    Ok(SerialClientMessage::Write { payload, append_newline }) => {
                        match write_text(&state, &payload, append_newline).await {
                            Ok(_) => None,
                            Err(e) => Some(Reply::Error { message: e.to_string() }),
                        }
                    }
                    Err(e) => Some(Reply::Error { message: format!("unsupported message: {}", e) }),
                };
                if let Some(message) = reply.as_ref().and_then(to_text) {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            }
            event = events.recv() => {
                if let Forward::Stop = forward_event(&mut socket, event, client).await {
                    break;
                }
            }
        }
    }
    log::info!("Serial stream client {} disconnected", client);
}

async fn ports_socket(mut socket: WebSocket, state: AppState) {
    let client = Uuid::new_v4();
    let mut events = state.events.subscribe_ports();
    log::info!("Port events client {} connected", client);

    let snapshot = BridgeEvent::PortsUpdate {
        ports: state.ports.current_ports().await,
    };
    if let Some(message) = to_text(&snapshot) {
        if socket.send(message).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let request = match text.as_str().trim() {
                    "ping" => {
                        // Plain-text heartbeat gets a plain-text answer.
                        if socket.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    "get_ports" => Ok(PortsClientMessage::GetPorts),
                    other => serde_json::from_str::<PortsClientMessage>(other),
                };
                let reply = match request {
                    Ok(PortsClientMessage::Ping) => to_text(&Reply::Pong),
                    Ok(PortsClientMessage::GetPorts) => {
                        if let Err(e) = state.ports.refresh().await {
                            log::warn!("Port refresh failed: {}", e);
                        }
                        to_text(&BridgeEvent::PortsUpdate {
                            ports: state.ports.current_ports().await,
                        })
                    }
                    Err(e) => to_text(&Reply::Error { message: format!("unsupported message: {}", e) }),
                };
                if let Some(message) = reply {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            }
            event = events.recv() => {
                if let Forward::Stop = forward_event(&mut socket, event, client).await {
                    break;
                }
            }
        }
    }
    log::info!("Port events client {} disconnected", client);
}
