/// Lifecycle event broadcasting over WebSocket
///
/// Every connected client receives every `container_update` event. Clients
/// may join and leave named rooms; membership is tracked per session and
/// acknowledged, but does not narrow delivery.
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use dashmap::DashMap;
use futures::{Sink, SinkExt, StreamExt};
use lxc_common::LifecycleEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;

/// Broadcast channel buffer size
const BROADCAST_BUFFER_SIZE: usize = 1000;

/// Room used when a join/leave request names none
pub const DEFAULT_ROOM: &str = "default";

pub const CONNECTED_MESSAGE: &str = "Connected to LXC API Server";

pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Frames sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { message: String },
    ContainerUpdate(LifecycleEvent),
    JoinedRoom { room: String },
    LeftRoom { room: String },
    Error { message: String },
}

/// Frames accepted from subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom {
        #[serde(default = "default_room")]
        room: String,
    },
    LeaveRoom {
        #[serde(default = "default_room")]
        room: String,
    },
}

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

/// Fan-out of lifecycle events plus the registry of connected sessions.
pub struct EventBroadcaster {
    events_tx: broadcast::Sender<LifecycleEvent>,
    /// session id -> joined rooms
    sessions: DashMap<Uuid, BTreeSet<String>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_BUFFER_SIZE);
        Self {
            events_tx,
            sessions: DashMap::new(),
        }
    }

    /// Publishes `event_type` to every subscriber. Never fails: with no
    /// subscribers the event is dropped.
    pub fn broadcast(&self, event_type: &str, data: Payload) {
        let event = LifecycleEvent::new(event_type, data);
        match self.events_tx.send(event) {
            Ok(receivers) => debug!("Broadcast {} to {} subscribers", event_type, receivers),
            Err(_) => debug!("Broadcast {} dropped: no subscribers", event_type),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub fn open_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, BTreeSet::new());
        id
    }

    pub fn close_session(&self, session: &Uuid) {
        self.sessions.remove(session);
    }

    /// Returns false if the session is unknown.
    pub fn join_room(&self, session: &Uuid, room: &str) -> bool {
        match self.sessions.get_mut(session) {
            Some(mut rooms) => {
                rooms.insert(room.to_string());
                true
            }
            None => false,
        }
    }

    /// Returns false if the session is unknown.
    pub fn leave_room(&self, session: &Uuid, room: &str) -> bool {
        match self.sessions.get_mut(session) {
            Some(mut rooms) => {
                rooms.remove(room);
                true
            }
            None => false,
        }
    }

    pub fn rooms(&self, session: &Uuid) -> Vec<String> {
        self.sessions
            .get(session)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sessions.len()
    }

    /// Applies a client frame and returns the acknowledgement to send back.
    pub fn handle_client_message(&self, session: &Uuid, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::JoinRoom { room }) => {
                self.join_room(session, &room);
                info!("Client {} joined room {}", session, room);
                ServerMessage::JoinedRoom { room }
            }
            Ok(ClientMessage::LeaveRoom { room }) => {
                self.leave_room(session, &room);
                info!("Client {} left room {}", session, room);
                ServerMessage::LeftRoom { room }
            }
            Err(e) => {
                warn!("Invalid client message from {}: {}", session, e);
                ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                }
            }
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn send_message<S>(sink: &mut S, message: &ServerMessage) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return true;
        }
    };

    match sink.send(Message::Text(json)).await {
        Ok(()) => true,
        Err(e) => {
            debug!("WebSocket send error: {}", e);
            false
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let events = state.events.clone();
    let session = events.open_session();
    info!("Client connected: {} (clients: {})", session, events.subscriber_count());

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before greeting so nothing published after `connected` is missed.
    let mut events_rx = events.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(16);

    let mut forward_task = tokio::spawn(async move {
        let greeting = ServerMessage::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        };
        if !send_message(&mut ws_tx, &greeting).await {
            return;
        }

        loop {
            let message = tokio::select! {
                event = events_rx.recv() => match event {
                    Ok(event) => ServerMessage::ContainerUpdate(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, {} events skipped", session, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            if !send_message(&mut ws_tx, &message).await {
                break;
            }
        }
    });

    let receive_events = events.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let reply = receive_events.handle_client_message(&session, &text);
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket close from {}", session);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", session, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Whichever side finishes first takes the other down with it
    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    }

    events.close_session(&session);
    info!("Client disconnected: {}", session);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let events = EventBroadcaster::new();
        events.broadcast("network_setup_start", Payload::new());
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let events = EventBroadcaster::new();
        let mut rx1 = events.subscribe();
        let mut rx2 = events.subscribe();

        events.broadcast("container_delete_start", payload(serde_json::json!({"name": "web1"})));

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.event_type, "container_delete_start");
            assert_eq!(event.data["name"], "web1");
        }
    }

    #[test]
    fn test_rooms() {
        let events = EventBroadcaster::new();
        let session = events.open_session();
        assert_eq!(events.subscriber_count(), 1);

        assert!(events.join_room(&session, "lab"));
        assert!(events.join_room(&session, "default"));
        assert_eq!(events.rooms(&session), vec!["default", "lab"]);

        assert!(events.leave_room(&session, "lab"));
        assert_eq!(events.rooms(&session), vec!["default"]);

        events.close_session(&session);
        assert_eq!(events.subscriber_count(), 0);
        assert!(!events.join_room(&session, "lab"));
        assert!(events.rooms(&session).is_empty());
    }

    #[test]
    fn test_client_messages() {
        let events = EventBroadcaster::new();
        let session = events.open_session();

        assert_eq!(
            events.handle_client_message(&session, r#"{"type":"join_room","room":"lab"}"#),
            ServerMessage::JoinedRoom { room: "lab".to_string() }
        );
        assert_eq!(
            events.handle_client_message(&session, r#"{"type":"join_room"}"#),
            ServerMessage::JoinedRoom { room: DEFAULT_ROOM.to_string() }
        );
        assert_eq!(
            events.handle_client_message(&session, r#"{"type":"leave_room","room":"lab"}"#),
            ServerMessage::LeftRoom { room: "lab".to_string() }
        );
        assert_eq!(events.rooms(&session), vec![DEFAULT_ROOM]);

        assert!(matches!(
            events.handle_client_message(&session, "join lab"),
            ServerMessage::Error { .. }
        ));
    }

    #[test]
    fn test_server_message_wire_format() {
        let connected = serde_json::to_value(ServerMessage::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        })
        .unwrap();
        assert_eq!(connected["event"], "connected");
        assert_eq!(connected["data"]["message"], CONNECTED_MESSAGE);

        let update = serde_json::to_value(ServerMessage::ContainerUpdate(LifecycleEvent::new(
            "container_restart_success",
            payload(serde_json::json!({"name": "web1"})),
        )))
        .unwrap();
        assert_eq!(update["event"], "container_update");
        assert_eq!(update["data"]["type"], "container_restart_success");
        assert_eq!(update["data"]["data"]["name"], "web1");
        assert!(update["data"]["timestamp"].is_string());
    }
}
