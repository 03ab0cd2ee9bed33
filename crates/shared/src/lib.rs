//! Shared wire protocol types for the handbrain game server and client.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;
