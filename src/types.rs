//! Common types used throughout the matchmaking broker

use serde::{Deserialize, Serialize};

/// Identifier of a dedicated-server session
pub type SessionId = String;

/// Identifier handed to a queued ticket
pub type TicketId = String;

/// Identifier of a match assigned to a session
pub type MatchId = String;

/// Account identifier of a player
pub type AccountId = String;

/// One party-member group inside a team (a singleton list of ids in practice)
pub type PartyGroup = Vec<AccountId>;

/// Ordered list of party-member groups
pub type Team = Vec<PartyGroup>;

/// The (version, playlist, region) triple tickets are matched on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    pub version: String,
    pub playlist: String,
    pub region: String,
}

impl QueueKey {
    pub fn new(
        version: impl Into<String>,
        playlist: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            playlist: playlist.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.playlist, self.version)
    }
}

/// Queue attributes of a ticket, taken from its verified claim set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketAttributes {
    pub account_id: AccountId,
    pub region: String,
    pub playlist: String,
    pub version: String,
    pub build_id: String,
    pub bucket_id: String,
    /// Party members in claim order; never empty
    pub party_member_ids: Vec<AccountId>,
    pub fill_team: bool,
    pub expires_at: i64,
    pub issued_at: i64,
    pub jti: String,
}

impl TicketAttributes {
    /// Key this ticket is matched on
    pub fn queue_key(&self) -> QueueKey {
        QueueKey::new(&self.version, &self.playlist, &self.region)
    }

    /// Whether the ticket waits in the given queue
    pub fn matches(&self, key: &QueueKey) -> bool {
        self.version == key.version && self.playlist == key.playlist && self.region == key.region
    }
}

/// Attributes a dedicated server registers with, taken from its claim set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerAttributes {
    pub bucket_id: String,
    pub region: String,
    pub version: String,
    pub build_id: String,
    pub expires_at: i64,
    pub issued_at: i64,
    pub jti: String,
}

/// Result status of one admission cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WAITING")]
    Waiting,
}

impl std::fmt::Display for SelectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStatus::Ok => write!(f, "OK"),
            SelectionStatus::Waiting => write!(f, "WAITING"),
        }
    }
}

/// Outcome of a playlist selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub playlist: Option<String>,
    pub status: SelectionStatus,
}

impl SelectionOutcome {
    pub fn waiting() -> Self {
        Self {
            playlist: None,
            status: SelectionStatus::Waiting,
        }
    }

    pub fn selected(playlist: impl Into<String>) -> Self {
        Self {
            playlist: Some(playlist.into()),
            status: SelectionStatus::Ok,
        }
    }

    pub fn is_selected(&self) -> bool {
        self.status == SelectionStatus::Ok
    }

    /// Playlist name, empty when nothing was selected
    pub fn playlist_or_empty(&self) -> &str {
        self.playlist.as_deref().unwrap_or("")
    }
}
