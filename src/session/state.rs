//! States a dedicated-server session moves through

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered session
///
/// `Registered -> (Idle <-> Admitting) -> Assigning -> Assigned -> Locked`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Authenticated and stored, acknowledgement not yet sent
    Registered,
    /// Waiting for the next admission tick
    Idle,
    /// An admission cycle is running
    Admitting,
    /// A playlist was chosen and the assignment is being sent
    Assigning,
    /// The server reported the match ready; tickets are being told to join
    Assigned,
    /// No further admissions
    Locked,
}

impl SessionState {
    /// Whether an admission tick may start a cycle
    pub fn accepts_admission(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_assigning(&self) -> bool {
        matches!(
            self,
            SessionState::Assigning | SessionState::Assigned | SessionState::Locked
        )
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, SessionState::Assigned | SessionState::Locked)
    }

    pub fn stops_allowing_connections(&self) -> bool {
        matches!(self, SessionState::Locked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Registered => "registered",
            SessionState::Idle => "idle",
            SessionState::Admitting => "admitting",
            SessionState::Assigning => "assigning",
            SessionState::Assigned => "assigned",
            SessionState::Locked => "locked",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
