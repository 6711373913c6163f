//! Session lifecycle state machine

pub mod lifecycle;
pub mod state;

pub use lifecycle::SessionLifecycle;
pub use state::SessionState;
