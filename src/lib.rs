//! Matchgate - real-time matchmaking broker
//!
//! This crate holds socket connections from queued player parties and from
//! dedicated game servers, selects playlists from rolling queue statistics,
//! assigns tickets to teams and notifies every party where to connect.

pub mod admin;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod gateway;
pub mod matchmaker;
pub mod metrics;
pub mod playlist;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaker::{Matchmaker, MatchmakerStats};
pub use store::{InMemorySessionStore, SessionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
