//! Websocket connection layer for the game server.
//!
//! One process holds one multiplexed connection; every command and every
//! subscription rides on it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  SocketManager                   │
//! │   (token-keyed, one Socket for the whole process)│
//! └──────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//!                  ┌────────────┐
//!                  │   Socket   │──── outgoing queue ──▶ server
//!                  │            │◀─── push / ack frames ─┘
//!                  └────────────┘
//!                    │        │
//!        acks, by    │        │  pushes, by event kind
//!        correlation │        │
//!                    ▼        ▼
//!              ┌──────────┐ ┌────────────────────┐
//!              │ Commands │ │ SubscriptionStore  │
//!              └──────────┘ └────────────────────┘
//! ```
//!
//! Consumers never construct a `Socket` directly; they go through
//! [`SocketManager`] and hold an `Arc` reference.

mod connection;
mod manager;

pub use connection::{ConnectionState, ListenerId, Socket};
pub use manager::SocketManager;
