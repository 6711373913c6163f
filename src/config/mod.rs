//! Configuration management for the matchgate broker
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod matchmaking;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, AuthSettings, ServiceSettings};
pub use matchmaking::{AdmissionTrigger, CleanupSettings, DeploymentMode, MatchmakingSettings};
