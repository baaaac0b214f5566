//! Chat room socket. Every connection sees every message.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use wirebridge_core::{Describe, RecordDef, SocketHandler, SocketSender, TypeDescriptor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub text: String,
    pub sent_at: u64,
}

impl Describe for ChatMessage {
    fn describe() -> TypeDescriptor {
        RecordDef::new("ChatMessage")
            .field::<String>("user")
            .field::<String>("text")
            .field::<u64>("sent_at")
            .doc("Unix seconds")
            .into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Say {
    pub user: String,
    pub text: String,
}

impl Describe for Say {
    fn describe() -> TypeDescriptor {
        RecordDef::new("Say")
            .field::<String>("user")
            .field::<String>("text")
            .into()
    }
}

#[derive(Debug, Clone)]
enum RoomEvent {
    Message(ChatMessage),
    Joined(String),
}

#[derive(Debug, Clone)]
pub struct Room {
    tx: broadcast::Sender<RoomEvent>,
}

impl Room {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Forward room events to one connection until it goes away.
async fn forward(mut rx: broadcast::Receiver<RoomEvent>, sender: SocketSender) {
    loop {
        let event = tokio::select! {
            _ = sender.closed() => break,
            event = rx.recv() => event,
        };
        let sent = match event {
            Ok(RoomEvent::Message(message)) => sender.send("message", message).await,
            Ok(RoomEvent::Joined(user)) => sender.send("joined", user).await,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Chat connection {} skipped {} events", sender.id(), n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if sent.is_err() {
            break;
        }
    }
}

pub fn socket(room: &Room) -> SocketHandler {
    let connect = room.clone();
    let join = room.clone();
    let say = room.clone();
    SocketHandler::new("chat")
        .module("chat")
        .describe("Shared chat room.")
        .server_event::<ChatMessage>("message")
        .server_event::<String>("joined")
        .client_event::<String>("join")
        .client_event::<Say>("say")
        .on_connect(move |sender| {
            let rx = connect.tx.subscribe();
            tokio::spawn(forward(rx, sender));
            async { Ok(()) }
        })
        .on("join", move |_, user: String| {
            let _ = join.tx.send(RoomEvent::Joined(user));
            async { Ok(()) }
        })
        .on("say", move |_, say_msg: Say| {
            let _ = say.tx.send(RoomEvent::Message(ChatMessage {
                user: say_msg.user,
                text: say_msg.text,
                sent_at: now(),
            }));
            async { Ok(()) }
        })
}
