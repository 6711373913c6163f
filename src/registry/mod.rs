//! Shared registries of live ticket and session connections
//!
//! These are the only process-wide mutable resources of the broker. Both hand
//! out copies so that no network send ever happens under a registry lock.

pub mod connection;
pub mod sessions;
pub mod tickets;

pub use connection::{ConnectionHandle, OutboundFrame};
pub use sessions::{SessionHandle, SessionRegistry};
pub use tickets::{TicketHandle, TicketRegistry};
