//! Shared data models for the handbrain websocket protocol.
//!
//! Every frame in either direction is a [`WsEnvelope`] carrying either a
//! [`ClientCommand`] (client to server) or a [`ServerEvent`] (server to
//! client). Acks reference the originating command through the envelope's
//! `correlation_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Websocket envelope ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    /// Wrap a payload in a fresh envelope with a new frame id.
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }
}

// --- Client commands ---

/// Commands a player sends to the game server. Each one is answered by a
/// single `ack` (or `error`) frame correlated by envelope id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinGame {
        #[serde(rename = "roomId")]
        room_id: String,
        player_id: String,
    },
    PickPiece {
        #[serde(rename = "roomId")]
        room_id: String,
        piece: String,
    },
    SendMove {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "move")]
        r#move: String,
    },
    SendEmoji {
        #[serde(rename = "roomId")]
        room_id: String,
        emoji: String,
    },
}

// --- Server events ---

/// Everything the server pushes down the socket.
///
/// The four game events carry no room id on the wire; the socket is already
/// scoped to the room the player joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full roster of player ids currently in the room.
    PlayerJoined(Vec<String>),
    /// A player locked in a piece type for the round.
    #[serde(rename = "piecePicked")]
    PiecePicked(String),
    /// A move was played.
    #[serde(rename = "sentMove")]
    SentMove(String),
    /// An emoji reaction.
    #[serde(rename = "sentEmoji")]
    SentEmoji(String),
    /// Acknowledgment for a client command (correlated by envelope id).
    Ack { message: String },
    /// Command rejection (correlated by envelope id).
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Split a push event into its stream kind and payload.
    /// Returns `None` for ack/error frames, which are not push streams.
    pub fn into_push(self) -> Option<(EventKind, PushPayload)> {
        match self {
            ServerEvent::PlayerJoined(ids) => {
                Some((EventKind::PlayerJoined, PushPayload::Roster(ids)))
            }
            ServerEvent::PiecePicked(piece) => {
                Some((EventKind::PiecePicked, PushPayload::Item(piece)))
            }
            ServerEvent::SentMove(mv) => Some((EventKind::SentMove, PushPayload::Item(mv))),
            ServerEvent::SentEmoji(emoji) => {
                Some((EventKind::SentEmoji, PushPayload::Item(emoji)))
            }
            ServerEvent::Ack { .. } | ServerEvent::Error { .. } => None,
        }
    }
}

/// The four server push streams, used as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerJoined,
    PiecePicked,
    SentMove,
    SentEmoji,
}

impl EventKind {
    /// The event name as it appears on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventKind::PlayerJoined => "player_joined",
            EventKind::PiecePicked => "piecePicked",
            EventKind::SentMove => "sentMove",
            EventKind::SentEmoji => "sentEmoji",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Payload of one push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    /// A whole-roster snapshot (replaces the cached value).
    Roster(Vec<String>),
    /// One incremental item (appended to the cached value).
    Item(String),
}

/// Ack payload returned to a command's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub message: String,
}

// --- Auth ---

/// Opaque session token issued by the REST auth endpoint. This layer only
/// consumes it: once as a connection credential, never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token(pub String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}
