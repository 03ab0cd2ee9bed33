//! The websocket connection task and frame routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use handbrain_shared::{
    ClientCommand, CommandAck, EventKind, PushPayload, ServerEvent, SocketError, WsEnvelope,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Connection state of the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Identifies one registered push listener, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(PushPayload) + Send + Sync>;
type PendingAck = oneshot::Sender<Result<CommandAck, SocketError>>;

/// One multiplexed websocket connection to the game server.
///
/// Commands are queued on an unbounded channel, so sends issued while the
/// connection is still being established are buffered and flushed once the
/// handshake completes; the socket itself performs no explicit queuing
/// logic. There is no reconnect here: when the transport drops, the state
/// goes to [`ConnectionState::Disconnected`] and stays there.
pub struct Socket {
    outgoing: UnboundedSender<WsEnvelope<ClientCommand>>,
    state: watch::Sender<ConnectionState>,
    /// In-flight commands awaiting an ack, keyed by envelope id.
    pending: Mutex<HashMap<String, PendingAck>>,
    /// Push listeners, one list per event kind, dispatched in
    /// registration order.
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_listener: AtomicU64,
}

impl Socket {
    /// Open a connection and spawn its background task.
    ///
    /// Returns immediately; the handshake happens on the task. Must be
    /// called from within a tokio runtime.
    pub fn connect(url: Url) -> Arc<Self> {
        let (outgoing, outgoing_rx) = unbounded();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let socket = Arc::new(Self {
            outgoing,
            state,
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
        });

        tokio::spawn(Arc::clone(&socket).run(url, outgoing_rx));

        socket
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch receiver for connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Send one command and await its ack.
    ///
    /// Resolves exactly once: with the server's ack message, with
    /// [`SocketError::Rejected`] if the server answers an `error` frame,
    /// or with [`SocketError::ConnectionClosed`] if the transport goes
    /// away first. No timeout and no retry live at this level.
    pub async fn request(&self, cmd: ClientCommand) -> Result<CommandAck, SocketError> {
        let envelope = WsEnvelope::new(cmd);
        let id = envelope.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if self.outgoing.unbounded_send(envelope).is_err() {
            // Connection task is gone; nobody will ever answer.
            self.pending.lock().remove(&id);
            return Err(SocketError::ConnectionClosed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SocketError::ConnectionClosed),
        }
    }

    /// Register a listener for one push event kind.
    pub fn add_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(PushPayload) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        tracing::debug!("listener {:?} registered for {}", id, kind);
        id
    }

    /// Remove a listener. Removing an id that is already gone is a no-op.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) {
        let mut listeners = self.listeners.write();
        if let Some(list) = listeners.get_mut(&kind) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                listeners.remove(&kind);
            }
        }
        tracing::debug!("listener {:?} removed for {}", id, kind);
    }

    /// Connection task: one handshake, then a select loop pumping the
    /// outgoing queue and routing incoming frames.
    async fn run(
        self: Arc<Self>,
        url: Url,
        mut outgoing_rx: UnboundedReceiver<WsEnvelope<ClientCommand>>,
    ) {
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                tracing::info!("websocket connected to {}", url.host_str().unwrap_or("?"));
                ws_stream
            }
            Err(e) => {
                tracing::error!("websocket connect failed: {}", e);
                self.state.send_replace(ConnectionState::Disconnected);
                self.drain_pending();
                return;
            }
        };

        self.state.send_replace(ConnectionState::Connected);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = outgoing_rx.next() => match frame {
                    Some(envelope) => match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            tracing::debug!("sending: {}", json);
                            if let Err(e) = write.send(Message::text(json)).await {
                                tracing::error!("send failed: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("serialize failed: {}", e);
                            self.fail_pending(
                                &envelope.id,
                                SocketError::Protocol(e.to_string()),
                            );
                        }
                    },
                    // All senders dropped; the socket owner is gone.
                    None => break,
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("websocket received close frame");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by tungstenite.
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong, etc.
                    }
                    Some(Err(e)) => {
                        tracing::error!("websocket read error: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }

        tracing::info!("websocket closed");
        self.state.send_replace(ConnectionState::Disconnected);
        self.drain_pending();
    }

    /// Parse one incoming frame and route it: acks and errors complete
    /// their pending command, pushes fan out to listeners.
    fn handle_frame(&self, text: &str) {
        let envelope = match serde_json::from_str::<WsEnvelope<ServerEvent>>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("failed to parse frame: {}", e);
                return;
            }
        };

        match envelope.payload {
            ServerEvent::Ack { message } => match envelope.correlation_id {
                Some(id) => self.complete_pending(&id, Ok(CommandAck { message })),
                None => tracing::warn!("ack without correlation id"),
            },
            ServerEvent::Error { code, message } => match envelope.correlation_id {
                Some(id) => {
                    self.complete_pending(&id, Err(SocketError::Rejected { code, message }))
                }
                None => tracing::warn!("server error ({}): {}", code, message),
            },
            event => {
                if let Some((kind, payload)) = event.into_push() {
                    self.dispatch(kind, payload);
                }
            }
        }
    }

    pub(crate) fn dispatch(&self, kind: EventKind, payload: PushPayload) {
        // Snapshot under the read lock, invoke outside it so a listener
        // may itself register or remove listeners.
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        tracing::debug!("dispatching {} to {} listener(s)", kind, targets.len());
        for listener in targets {
            listener(payload.clone());
        }
    }

    fn complete_pending(&self, id: &str, result: Result<CommandAck, SocketError>) {
        match self.pending.lock().remove(id) {
            // Caller may have dropped the future; completion is best-effort.
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!("ack for unknown command id {}", id),
        }
    }

    fn fail_pending(&self, id: &str, err: SocketError) {
        if let Some(tx) = self.pending.lock().remove(id) {
            let _ = tx.send(Err(err));
        }
    }

    /// Reject every in-flight command; called once the connection is gone.
    fn drain_pending(&self) {
        let drained: Vec<PendingAck> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(SocketError::ConnectionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_socket() -> Arc<Socket> {
        // A socket whose connection task never ran; listener registry and
        // pending map behave the same either way.
        let (outgoing, _rx) = unbounded();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Arc::new(Socket {
            outgoing,
            state,
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    #[test]
    fn listeners_dispatch_in_registration_order() {
        let socket = detached_socket();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        socket.add_listener(EventKind::SentMove, move |_| seen_a.lock().push("a"));
        let seen_b = Arc::clone(&seen);
        socket.add_listener(EventKind::SentMove, move |_| seen_b.lock().push("b"));

        socket.dispatch(EventKind::SentMove, PushPayload::Item("e2e4".to_string()));
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn removed_listener_no_longer_fires() {
        let socket = detached_socket();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_inner = Arc::clone(&seen);
        let id = socket.add_listener(EventKind::SentEmoji, move |_| *seen_inner.lock() += 1);

        socket.dispatch(EventKind::SentEmoji, PushPayload::Item("🎉".to_string()));
        socket.remove_listener(EventKind::SentEmoji, id);
        socket.dispatch(EventKind::SentEmoji, PushPayload::Item("🎉".to_string()));

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn remove_listener_twice_is_noop() {
        let socket = detached_socket();
        let id = socket.add_listener(EventKind::PiecePicked, |_| {});
        socket.remove_listener(EventKind::PiecePicked, id);
        socket.remove_listener(EventKind::PiecePicked, id);
    }

    #[test]
    fn dispatch_only_hits_matching_kind() {
        let socket = detached_socket();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_inner = Arc::clone(&seen);
        socket.add_listener(EventKind::PlayerJoined, move |_| *seen_inner.lock() += 1);

        socket.dispatch(EventKind::SentMove, PushPayload::Item("e2e4".to_string()));
        assert_eq!(*seen.lock(), 0);
    }
}
