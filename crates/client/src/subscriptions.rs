//! Reactive cache entries fed by server push events.
//!
//! The store keeps one entry per (cache key, event kind) pair. Consumers
//! activate an entry and observe its value through a watch channel; the
//! entry registers a push listener on the shared socket and folds incoming
//! payloads into the value per its accumulator policy.
//!
//! # Entry lifecycle
//!
//! ```text
//! Pending ──(data ready)──▶ Armed/Active ──(last deactivation)──▶ TornDown
//!    │                                                               ▲
//!    └────────────(deactivated before data ready)────────────────────┘
//! ```
//!
//! The data-ready signal and teardown race against each other: an entry
//! torn down before its data is ready must never register a listener, and
//! that abandoned arming is a cancellation, not an error. Nothing is
//! surfaced to the caller and nothing is logged as a failure.

use std::collections::HashMap;
use std::sync::Arc;

use handbrain_shared::{EventKind, PushPayload};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::socket::{ListenerId, Socket};

/// How successive push payloads fold into an entry's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulator {
    /// Each roster payload replaces the whole value.
    Replace,
    /// Each item payload is appended, preserving arrival order.
    Append,
}

/// Listener registration state for one entry.
///
/// Transitions are one-way: `Pending -> Armed -> TornDown`, with
/// `Pending -> TornDown` when teardown wins the arming race. The slot's
/// mutex is what makes registration and deregistration exactly-once.
enum ListenerSlot {
    Pending,
    Armed(ListenerId),
    TornDown,
}

struct Entry {
    kind: EventKind,
    accumulator: Accumulator,
    value: watch::Sender<Vec<String>>,
    /// Cancelled when the last consumer deactivates.
    removed: CancellationToken,
    listener: Mutex<ListenerSlot>,
}

impl Entry {
    /// Fold one push payload into the value.
    fn apply(&self, payload: PushPayload) {
        // A dispatch snapshot taken just before teardown may still invoke
        // us after the listener was removed; the torn-down value must not
        // move.
        if self.removed.is_cancelled() {
            return;
        }
        match (self.accumulator, payload) {
            (Accumulator::Replace, PushPayload::Roster(ids)) => {
                self.value.send_modify(|value| *value = ids);
            }
            (Accumulator::Append, PushPayload::Item(item)) => {
                self.value.send_modify(|value| value.push(item));
            }
            (_, payload) => {
                tracing::warn!(
                    "push payload for {} does not match accumulator policy: {:?}",
                    self.kind,
                    payload
                );
            }
        }
    }
}

struct EntrySlot {
    refcount: usize,
    entry: Arc<Entry>,
}

struct StoreInner {
    socket: Arc<Socket>,
    entries: Mutex<HashMap<(String, EventKind), EntrySlot>>,
}

impl StoreInner {
    /// Wait out the arming race, then register the push listener.
    ///
    /// Teardown has priority: if the entry was removed before its data was
    /// ready, the wait is abandoned silently and no listener ever exists.
    async fn arm(self: Arc<Self>, entry: Arc<Entry>, data_ready: oneshot::Receiver<()>) {
        tokio::select! {
            biased;
            _ = entry.removed.cancelled() => {
                // Deactivated before the first value was observed. This is
                // rapid mount/unmount, not a failure.
                return;
            }
            ready = data_ready => {
                if ready.is_err() {
                    return;
                }
            }
        }

        let mut slot = entry.listener.lock();
        // Teardown may have won between the select and the lock; check the
        // token immediately before registering.
        if entry.removed.is_cancelled() {
            return;
        }
        let target = Arc::clone(&entry);
        let id = self
            .socket
            .add_listener(entry.kind, move |payload| target.apply(payload));
        *slot = ListenerSlot::Armed(id);
    }

    fn release(&self, key: &(String, EventKind)) {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(slot) if slot.refcount > 1 => {
                    slot.refcount -= 1;
                    None
                }
                Some(_) => entries.remove(key).map(|slot| slot.entry),
                None => None,
            }
        };

        if let Some(entry) = entry {
            self.teardown(&entry);
        }
    }

    /// Tear an entry down exactly once: cancel the arming race, then
    /// deregister the listener if it ever got registered.
    fn teardown(&self, entry: &Entry) {
        entry.removed.cancel();
        let mut slot = entry.listener.lock();
        if let ListenerSlot::Armed(id) = std::mem::replace(&mut *slot, ListenerSlot::TornDown) {
            self.socket.remove_listener(entry.kind, id);
        }
    }
}

/// Store of push-fed cache entries, one per (cache key, event kind).
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct SubscriptionStore {
    inner: Arc<StoreInner>,
}

impl SubscriptionStore {
    pub fn new(socket: Arc<Socket>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                socket,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Activate a subscription for `(cache_key, kind)`.
    ///
    /// The first activation creates the entry (initial value: empty) and
    /// arms its push listener once the initial value is in place; further
    /// activations only bump a reference count and observe the same value.
    /// The entry lives until the last handle is deactivated or dropped.
    pub fn activate(
        &self,
        cache_key: impl Into<String>,
        kind: EventKind,
        accumulator: Accumulator,
    ) -> SubscriptionHandle {
        let key = (cache_key.into(), kind);
        let mut entries = self.inner.entries.lock();

        let entry = match entries.get_mut(&key) {
            Some(slot) => {
                if slot.entry.accumulator != accumulator {
                    tracing::warn!(
                        "subscription for {:?} already active with a different accumulator",
                        key
                    );
                }
                slot.refcount += 1;
                Arc::clone(&slot.entry)
            }
            None => {
                let (value, _) = watch::channel(Vec::new());
                let entry = Arc::new(Entry {
                    kind,
                    accumulator,
                    value,
                    removed: CancellationToken::new(),
                    listener: Mutex::new(ListenerSlot::Pending),
                });
                entries.insert(
                    key.clone(),
                    EntrySlot {
                        refcount: 1,
                        entry: Arc::clone(&entry),
                    },
                );

                let (ready_tx, ready_rx) = oneshot::channel();
                tokio::spawn(Arc::clone(&self.inner).arm(Arc::clone(&entry), ready_rx));
                // The watch channel is seeded with the initial value, so
                // data is ready as soon as the handle below exists.
                let _ = ready_tx.send(());

                entry
            }
        };

        SubscriptionHandle {
            inner: Arc::clone(&self.inner),
            key: Some(key),
            rx: entry.value.subscribe(),
        }
    }
}

/// One consumer's view of a subscription entry.
///
/// Dropping the handle deactivates it; [`deactivate`](Self::deactivate) is
/// the explicit form. The watch receiver keeps serving the last observed
/// value after teardown, but nothing mutates it anymore.
pub struct SubscriptionHandle {
    inner: Arc<StoreInner>,
    key: Option<(String, EventKind)>,
    rx: watch::Receiver<Vec<String>>,
}

impl SubscriptionHandle {
    /// Current cached value.
    pub fn value(&self) -> Vec<String> {
        self.rx.borrow().clone()
    }

    /// Wait for the next value change. Returns `false` once no further
    /// changes can arrive (entry torn down and sender gone).
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// A standalone watcher over the entry's value.
    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.rx.clone()
    }

    /// Deactivate explicitly (equivalent to dropping the handle).
    pub fn deactivate(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.release(&key);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    /// Socket whose connect attempt goes nowhere; the listener registry
    /// and dispatch path work without a live transport.
    fn offline_socket() -> Arc<Socket> {
        let url = Url::parse("ws://127.0.0.1:9").unwrap();
        Socket::connect(url)
    }

    /// Let spawned arming tasks run to completion.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn append_preserves_arrival_order() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let handle = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        settle().await;

        for mv in ["e1", "e2", "e3"] {
            socket.dispatch(EventKind::SentMove, PushPayload::Item(mv.to_string()));
        }

        assert_eq!(handle.value(), vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn replace_overwrites_whole_value() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let handle = store.activate("tok", EventKind::PlayerJoined, Accumulator::Replace);
        settle().await;

        socket.dispatch(
            EventKind::PlayerJoined,
            PushPayload::Roster(vec!["p1".to_string()]),
        );
        socket.dispatch(
            EventKind::PlayerJoined,
            PushPayload::Roster(vec!["p1".to_string(), "p2".to_string()]),
        );

        assert_eq!(handle.value(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn deactivation_before_data_ready_registers_nothing() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        // Dropped before the arming task ever gets to run.
        let handle = store.activate("tok", EventKind::PiecePicked, Accumulator::Append);
        let rx = handle.watch();
        drop(handle);
        settle().await;

        socket.dispatch(EventKind::PiecePicked, PushPayload::Item("rook".to_string()));
        settle().await;

        assert!(rx.borrow().is_empty());
    }

    #[tokio::test]
    async fn pushes_after_teardown_do_not_mutate_value() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let handle = store.activate("tok", EventKind::SentEmoji, Accumulator::Append);
        settle().await;

        socket.dispatch(EventKind::SentEmoji, PushPayload::Item("🎉".to_string()));
        let rx = handle.watch();
        handle.deactivate();

        socket.dispatch(EventKind::SentEmoji, PushPayload::Item("🔥".to_string()));
        settle().await;

        assert_eq!(*rx.borrow(), vec!["🎉"]);
    }

    #[tokio::test]
    async fn refcount_keeps_entry_alive_until_last_handle() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let first = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        let second = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        settle().await;

        drop(first);
        socket.dispatch(EventKind::SentMove, PushPayload::Item("e2e4".to_string()));
        assert_eq!(second.value(), vec!["e2e4"]);

        let rx = second.watch();
        drop(second);
        socket.dispatch(EventKind::SentMove, PushPayload::Item("d2d4".to_string()));
        assert_eq!(*rx.borrow(), vec!["e2e4"]);
    }

    #[tokio::test]
    async fn shared_key_observes_one_value() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let first = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        let second = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        settle().await;

        socket.dispatch(EventKind::SentMove, PushPayload::Item("e2e4".to_string()));

        assert_eq!(first.value(), second.value());
        assert_eq!(first.value(), vec!["e2e4"]);
    }

    #[tokio::test]
    async fn mismatched_payload_shape_is_ignored() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let handle = store.activate("tok", EventKind::PlayerJoined, Accumulator::Replace);
        settle().await;

        // Replace policy expects a roster, not a single item.
        socket.dispatch(EventKind::PlayerJoined, PushPayload::Item("p1".to_string()));

        assert!(handle.value().is_empty());
    }

    #[tokio::test]
    async fn reactivation_after_teardown_starts_fresh() {
        let socket = offline_socket();
        let store = SubscriptionStore::new(Arc::clone(&socket));

        let handle = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        settle().await;
        socket.dispatch(EventKind::SentMove, PushPayload::Item("e2e4".to_string()));
        handle.deactivate();

        let handle = store.activate("tok", EventKind::SentMove, Accumulator::Append);
        settle().await;
        socket.dispatch(EventKind::SentMove, PushPayload::Item("d2d4".to_string()));

        assert_eq!(handle.value(), vec!["d2d4"]);
    }
}
