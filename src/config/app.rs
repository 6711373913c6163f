//! Main application configuration
//!
//! This module defines the primary configuration structures for the matchgate
//! broker, including environment variable loading, TOML loading and validation.

use super::matchmaking::{CleanupSettings, MatchmakingSettings};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub auth: AuthSettings,
    pub matchmaking: MatchmakingSettings,
    pub cleanup: CleanupSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Interface both gateway listeners bind to
    pub bind_host: String,
    /// Plain listener port
    pub http_port: u16,
    /// Second listener port, fronted by a TLS terminator
    pub secure_port: Option<u16>,
    /// Port for metrics and health endpoints
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// Outbound frames buffered per connection before sends fail
    pub outbound_buffer: usize,
}

/// Credential verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 shared secret; provisioned through the environment or config file
    pub jwt_secret: String,
    /// Scheme marker on ticket sockets
    pub ticket_scheme: String,
    /// Scheme marker on session sockets
    pub session_scheme: String,
    /// Reject tokens whose `exp` has passed
    pub validate_expiry: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "matchgate".to_string(),
            log_level: "info".to_string(),
            bind_host: "0.0.0.0".to_string(),
            http_port: 21921,
            secure_port: Some(8443),
            metrics_port: 9090,
            shutdown_timeout_seconds: 30,
            outbound_buffer: 64,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            ticket_scheme: "Vesta".to_string(),
            session_scheme: "Vesta-Sessions".to_string(),
            validate_expiry: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", name, value))
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still win
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(host) = env::var("BIND_HOST") {
            self.service.bind_host = host;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            self.service.http_port = parse_env("HTTP_PORT", &port)?;
        }
        if let Ok(port) = env::var("SECURE_PORT") {
            self.service.secure_port = if port.is_empty() || port == "0" {
                None
            } else {
                Some(parse_env("SECURE_PORT", &port)?)
            };
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            self.service.metrics_port = parse_env("METRICS_PORT", &port)?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds =
                parse_env("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }

        // Auth settings
        if let Ok(secret) = env::var("MATCHGATE_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(validate) = env::var("JWT_VALIDATE_EXPIRY") {
            self.auth.validate_expiry = parse_env("JWT_VALIDATE_EXPIRY", &validate)?;
        }

        // Matchmaking settings
        if let Ok(mode) = env::var("MATCHMAKING_MODE") {
            self.matchmaking.mode = mode.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Ok(trigger) = env::var("ADMISSION_TRIGGER") {
            self.matchmaking.admission_trigger =
                trigger.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Ok(floor) = env::var("THRESHOLD_FLOOR") {
            self.matchmaking.threshold_floor = parse_env("THRESHOLD_FLOOR", &floor)?;
        }
        if let Ok(window) = env::var("STATISTICS_WINDOW_SECONDS") {
            self.matchmaking.statistics_window_seconds =
                parse_env("STATISTICS_WINDOW_SECONDS", &window)?;
        }
        if let Ok(max_players) = env::var("DEFAULT_MAX_PLAYERS") {
            self.matchmaking.default_max_players = parse_env("DEFAULT_MAX_PLAYERS", &max_players)?;
        }
        if let Ok(tick) = env::var("ADMISSION_TICK_MS") {
            self.matchmaking.admission_tick_ms = parse_env("ADMISSION_TICK_MS", &tick)?;
        }
        if let Ok(enabled) = env::var("BACKFILL_ENABLED") {
            self.matchmaking.backfill_enabled = parse_env("BACKFILL_ENABLED", &enabled)?;
        }

        // Cleanup settings
        if let Ok(interval) = env::var("CLEANUP_INTERVAL_SECONDS") {
            self.cleanup.interval_seconds = parse_env("CLEANUP_INTERVAL_SECONDS", &interval)?;
        }
        if let Ok(stale) = env::var("CLEANUP_STALE_AFTER_SECONDS") {
            self.cleanup.stale_after_seconds = parse_env("CLEANUP_STALE_AFTER_SECONDS", &stale)?;
        }
        if let Ok(orphan) = env::var("CLEANUP_ORPHAN_AFTER_SECONDS") {
            self.cleanup.orphan_after_seconds =
                parse_env("CLEANUP_ORPHAN_AFTER_SECONDS", &orphan)?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get cleanup interval as Duration
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup.interval()
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.metrics_port == 0 {
        return Err(anyhow!("Metrics port cannot be 0"));
    }
    if config.service.secure_port == Some(config.service.http_port) {
        return Err(anyhow!("Secure port must differ from the HTTP port"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.outbound_buffer == 0 {
        return Err(anyhow!("Outbound buffer must be greater than 0"));
    }

    if config.auth.jwt_secret.is_empty() {
        return Err(anyhow!(
            "JWT secret is not set (MATCHGATE_JWT_SECRET or [auth].jwt_secret)"
        ));
    }
    if config.auth.ticket_scheme.is_empty() || config.auth.session_scheme.is_empty() {
        return Err(anyhow!("Credential scheme markers cannot be empty"));
    }
    if config.auth.ticket_scheme == config.auth.session_scheme {
        return Err(anyhow!("Ticket and session schemes must differ"));
    }

    let mm = &config.matchmaking;
    if mm.threshold_floor == 0 {
        return Err(anyhow!("Threshold floor must be at least 1"));
    }
    if mm.default_max_players == 0 {
        return Err(anyhow!("Default max players must be greater than 0"));
    }
    if mm.admission_tick_ms == 0 || mm.queue_poll_ms == 0 {
        return Err(anyhow!("Admission tick and queue poll must be greater than 0"));
    }
    if mm.session_ping_seconds == 0 || mm.ticket_ping_seconds == 0 {
        return Err(anyhow!("Ping intervals must be greater than 0"));
    }
    if mm.pong_wait_seconds <= mm.session_ping_seconds {
        return Err(anyhow!("Pong wait must exceed the session ping interval"));
    }
    if mm.max_message_size == 0 {
        return Err(anyhow!("Max message size must be greater than 0"));
    }

    if config.cleanup.interval_seconds == 0 {
        return Err(anyhow!("Cleanup interval must be greater than 0"));
    }
    if config.cleanup.orphan_after_seconds > config.cleanup.stale_after_seconds {
        return Err(anyhow!("Orphan bound cannot exceed the staleness bound"));
    }

    Ok(())
}
