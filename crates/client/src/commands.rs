//! Typed, ack-awaited player commands.
//!
//! Each method sends one command frame and resolves once with the server's
//! ack message. At-most-once, fire-and-wait: no timeout, no retry, no
//! idempotency token. Callers needing a deadline wrap the future themselves.

use std::sync::Arc;

use handbrain_shared::{ClientCommand, CommandAck, SocketError};

use crate::socket::Socket;

/// Command gateway over the shared socket.
#[derive(Clone)]
pub struct Commands {
    socket: Arc<Socket>,
}

impl Commands {
    pub fn new(socket: Arc<Socket>) -> Self {
        Self { socket }
    }

    /// Join a game room.
    pub async fn join_game(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> Result<CommandAck, SocketError> {
        self.socket
            .request(ClientCommand::JoinGame {
                room_id: room_id.to_string(),
                player_id: player_id.to_string(),
            })
            .await
    }

    /// Lock in a piece type for the round.
    pub async fn pick_piece(&self, room_id: &str, piece: &str) -> Result<CommandAck, SocketError> {
        self.socket
            .request(ClientCommand::PickPiece {
                room_id: room_id.to_string(),
                piece: piece.to_string(),
            })
            .await
    }

    /// Submit a move.
    pub async fn send_move(&self, room_id: &str, mv: &str) -> Result<CommandAck, SocketError> {
        self.socket
            .request(ClientCommand::SendMove {
                room_id: room_id.to_string(),
                r#move: mv.to_string(),
            })
            .await
    }

    /// Send an emoji reaction.
    pub async fn send_emoji(&self, room_id: &str, emoji: &str) -> Result<CommandAck, SocketError> {
        self.socket
            .request(ClientCommand::SendEmoji {
                room_id: room_id.to_string(),
                emoji: emoji.to_string(),
            })
            .await
    }
}
