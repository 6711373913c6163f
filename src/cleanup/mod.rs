//! Cleanup of abandoned session records

pub mod reaper;

pub use reaper::{CleanupReport, ReapReason, SessionReaper};
