//! Handbrain client - real-time synchronization layer.
//!
//! This crate bridges one persistent, multiplexed websocket connection to
//! many independently-mounted UI caches:
//!
//! - [`socket`] owns the connection (single socket per process, token-keyed)
//! - [`commands`] sends ack-awaited player commands over it
//! - [`subscriptions`] folds server push events into reactive cache entries
//!
//! REST authentication lives elsewhere; this crate only consumes the token
//! it produced.

pub mod commands;
pub mod config;
pub mod socket;
pub mod subscriptions;

pub use commands::Commands;
pub use config::{Environment, SocketConfig};
pub use socket::{ConnectionState, ListenerId, Socket, SocketManager};
pub use subscriptions::{Accumulator, SubscriptionHandle, SubscriptionStore};

pub use handbrain_shared::{CommandAck, EventKind, SocketError, Token};
