//! Process-wide socket ownership.

use std::sync::Arc;

use handbrain_shared::{SocketError, Token};
use once_cell::sync::OnceCell;

use super::connection::Socket;
use crate::config::SocketConfig;

/// Owns the single [`Socket`] for the process.
///
/// Constructed explicitly at application startup and passed by reference to
/// whatever needs the connection; there is no module-level global.
///
/// # Known limitation
///
/// The token passed to the *first* [`get_or_connect`](Self::get_or_connect)
/// call is the one the connection is built with. Later calls return the
/// same socket even when handed a different token, so re-authentication
/// within one process keeps riding the original credentials. This mirrors
/// the one-session-per-process assumption of the upstream client and is
/// documented rather than silently changed.
pub struct SocketManager {
    config: SocketConfig,
    socket: OnceCell<Arc<Socket>>,
}

impl SocketManager {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            socket: OnceCell::new(),
        }
    }

    /// Get the shared socket, connecting on first use.
    ///
    /// The first call opens the transport with the token as a query
    /// parameter; every subsequent call returns the same `Arc` unchanged,
    /// regardless of the token argument. First-time construction is
    /// race-free across threads (the cell performs the double-checked
    /// locking). Must be called from within a tokio runtime.
    pub fn get_or_connect(&self, token: &Token) -> Result<Arc<Socket>, SocketError> {
        self.socket
            .get_or_try_init(|| {
                let url = self.config.connect_url(token)?;
                tracing::info!("opening socket to {}", self.config.endpoint());
                Ok(Socket::connect(url))
            })
            .cloned()
    }

    /// The socket, if one has been created.
    pub fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.get().cloned()
    }
}
