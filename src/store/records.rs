//! Persisted record types shared with the external session store

use crate::error::{MatchmakingError, Result};
use crate::types::{AccountId, SessionId};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dedicated-server session as persisted by the administrative API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub region: String,
    pub playlist: String,
    pub version: String,
    pub build_id: String,
    pub server_address: String,
    pub server_port: u16,
    /// Raw attributes JSON as reported by the server
    pub attributes: String,
    pub public_players: Vec<AccountId>,
    pub active_players: usize,
    pub all_players: usize,
    /// Tickets may be pointed at this session
    pub accessible: bool,
    /// Tickets may join this session right away
    pub available: bool,
    pub started: bool,
    pub join_in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a new record with no occupants
    pub fn new(
        session_id: impl Into<String>,
        region: impl Into<String>,
        playlist: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            session_id: session_id.into(),
            region: region.into(),
            playlist: playlist.into(),
            version: version.into(),
            build_id: String::new(),
            server_address: String::new(),
            server_port: 0,
            attributes: String::new(),
            public_players: Vec::new(),
            active_players: 0,
            all_players: 0,
            accessible: false,
            available: false,
            started: false,
            join_in_progress: false,
            created_at: now,
            last_updated: now,
        }
    }

    /// Number of players the server reports as present
    pub fn occupancy(&self) -> usize {
        self.public_players.len()
    }

    /// Max players per server read from the attributes JSON.
    ///
    /// Missing attributes or a missing/non-numeric `MaxPlayers` fall back to
    /// `default`; attributes that are not valid JSON are an error.
    pub fn max_players(&self, default: usize) -> Result<usize> {
        if self.attributes.trim().is_empty() {
            return Ok(default);
        }

        let attributes: serde_json::Value =
            serde_json::from_str(&self.attributes).map_err(|e| {
                MatchmakingError::InvalidAttributes {
                    session_id: self.session_id.clone(),
                    reason: e.to_string(),
                }
            })?;

        if !attributes.is_object() {
            return Err(MatchmakingError::InvalidAttributes {
                session_id: self.session_id.clone(),
                reason: "attributes are not a JSON object".to_string(),
            }
            .into());
        }

        Ok(attributes
            .get("MaxPlayers")
            .and_then(|v| v.as_f64())
            .filter(|v| *v >= 1.0)
            .map(|v| v as usize)
            .unwrap_or(default))
    }

    /// Refresh the last-updated timestamp
    pub fn touch(&mut self) {
        self.last_updated = current_timestamp();
    }
}

/// One admitted ticket, written when it is pointed at a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAssignment {
    pub account_id: AccountId,
    pub session_id: SessionId,
    pub team: Vec<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl PlayerAssignment {
    pub fn new(account_id: impl Into<String>, session_id: impl Into<String>, team: Vec<String>) -> Self {
        Self {
            account_id: account_id.into(),
            session_id: session_id.into(),
            team,
            created_at: current_timestamp(),
        }
    }
}

/// Filter over session records; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub region: Option<String>,
    pub playlist: Option<String>,
    pub version: Option<String>,
    pub accessible: Option<bool>,
    pub started: Option<bool>,
}

impl RecordQuery {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    pub fn with_playlist(mut self, playlist: impl Into<String>) -> Self {
        self.playlist = Some(playlist.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn accessible(mut self, accessible: bool) -> Self {
        self.accessible = Some(accessible);
        self
    }

    pub fn started(mut self, started: bool) -> Self {
        self.started = Some(started);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.region.as_ref().map_or(true, |r| *r == record.region)
            && self.playlist.as_ref().map_or(true, |p| *p == record.playlist)
            && self.version.as_ref().map_or(true, |v| *v == record.version)
            && self.accessible.map_or(true, |a| a == record.accessible)
            && self.started.map_or(true, |s| s == record.started)
    }
}
