//! Matchmaking and cleanup configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How queued tickets learn about their session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Tickets are matched straight against accessible persisted records
    Direct,
    /// Tickets wait for a session socket to be assigned a match
    Matchmade,
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(DeploymentMode::Direct),
            "matchmade" => Ok(DeploymentMode::Matchmade),
            other => Err(format!("unknown deployment mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Direct => write!(f, "direct"),
            DeploymentMode::Matchmade => write!(f, "matchmade"),
        }
    }
}

/// Which connection's ticker drives admission attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionTrigger {
    /// Every queued ticket's poll tick attempts admission for its region
    Ticket,
    /// Every session socket attempts admission for its own region
    Session,
}

impl FromStr for AdmissionTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ticket" => Ok(AdmissionTrigger::Ticket),
            "session" => Ok(AdmissionTrigger::Session),
            other => Err(format!("unknown admission trigger '{}'", other)),
        }
    }
}

/// Matchmaking engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    pub mode: DeploymentMode,
    pub admission_trigger: AdmissionTrigger,
    /// Lowest admission threshold, used on cold start
    pub threshold_floor: usize,
    /// Trailing window a playlist statistic stays usable for
    pub statistics_window_seconds: u64,
    /// Max players per server when the anchor record does not say
    pub default_max_players: usize,
    /// Last-selected playlist recorded for a fresh region
    pub default_playlist: String,
    /// Playlist that is reset to the default before each cycle
    pub alternate_playlist: String,
    pub admission_tick_ms: u64,
    /// Pause between team formation and the AssignMatch snapshot
    pub assign_settle_ms: u64,
    /// Pause between a "ready" result and the first join notification
    pub ready_settle_ms: u64,
    pub join_pacing_ms: u64,
    /// Pause between the last join notification and lock-out
    pub lock_delay_ms: u64,
    pub connecting_delay_ms: u64,
    pub waiting_delay_ms: u64,
    pub direct_play_delay_ms: u64,
    pub queue_poll_ms: u64,
    pub ticket_ping_seconds: u64,
    pub session_ping_seconds: u64,
    pub pong_wait_seconds: u64,
    pub write_wait_seconds: u64,
    pub max_message_size: usize,
    pub join_delay_seconds: u64,
    pub backfill_enabled: bool,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Matchmade,
            admission_trigger: AdmissionTrigger::Ticket,
            threshold_floor: 2,
            statistics_window_seconds: 180,
            default_max_players: 50,
            default_playlist: "playlist_showdownalt_solo".to_string(),
            alternate_playlist: "playlist_showdownalt_duos".to_string(),
            admission_tick_ms: 500,
            assign_settle_ms: 2000,
            ready_settle_ms: 2000,
            join_pacing_ms: 100,
            lock_delay_ms: 3000,
            connecting_delay_ms: 400,
            waiting_delay_ms: 500,
            direct_play_delay_ms: 500,
            queue_poll_ms: 500,
            ticket_ping_seconds: 30,
            session_ping_seconds: 54,
            pong_wait_seconds: 60,
            write_wait_seconds: 10,
            max_message_size: 512,
            join_delay_seconds: 1,
            backfill_enabled: false,
        }
    }
}

impl MatchmakingSettings {
    /// Settings with every deliberate delay removed, for tests and benches
    pub fn without_delays() -> Self {
        Self {
            assign_settle_ms: 0,
            ready_settle_ms: 0,
            join_pacing_ms: 0,
            lock_delay_ms: 0,
            connecting_delay_ms: 0,
            waiting_delay_ms: 0,
            direct_play_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn statistics_window(&self) -> Duration {
        Duration::from_secs(self.statistics_window_seconds)
    }

    pub fn admission_tick(&self) -> Duration {
        Duration::from_millis(self.admission_tick_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn ticket_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ticket_ping_seconds)
    }

    pub fn session_ping_interval(&self) -> Duration {
        Duration::from_secs(self.session_ping_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }
}

/// Cleanup reaper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub interval_seconds: u64,
    /// Records not updated for this long are retired outright
    pub stale_after_seconds: u64,
    /// Occupied records without a live server are retired after this long
    pub orphan_after_seconds: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 120,
            stale_after_seconds: 30 * 60,
            orphan_after_seconds: 3 * 60,
        }
    }
}

impl CleanupSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_seconds as i64)
    }

    pub fn orphan_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_after_seconds as i64)
    }
}
