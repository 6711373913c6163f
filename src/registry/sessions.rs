//! Registry of live dedicated-server sessions
//!
//! Every read and mutation of a session handle, including its team list and
//! state flags, goes through the single lock owned by this registry. Reads
//! return copies; mutations run a closure under the write lock.

use super::connection::ConnectionHandle;
use crate::error::{MatchmakingError, Result};
use crate::session::SessionState;
use crate::types::{MatchId, ServerAttributes, SessionId, Team};
use crate::utils::{current_timestamp, generate_match_id};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// A dedicated-server connection and its assignment state
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub match_id: MatchId,
    pub server: ServerAttributes,
    pub state: SessionState,
    /// Join notifications are being sent
    pub is_sending: bool,
    pub playlist: Option<String>,
    pub min_players: usize,
    pub max_players: usize,
    pub teams: Vec<Team>,
    pub connection: ConnectionHandle,
    pub registered_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(
        session_id: impl Into<String>,
        server: ServerAttributes,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            match_id: generate_match_id(),
            server,
            state: SessionState::Registered,
            is_sending: false,
            playlist: None,
            min_players: 2,
            max_players: 0,
            teams: Vec::new(),
            connection,
            registered_at: current_timestamp(),
        }
    }

    pub fn region(&self) -> &str {
        &self.server.region
    }

    /// Whether an admission tick may start a cycle for this session
    pub fn accepts_admission(&self) -> bool {
        self.state.accepts_admission() && !self.is_sending
    }

    pub fn is_assigning(&self) -> bool {
        self.state.is_assigning()
    }

    pub fn is_assigned(&self) -> bool {
        self.state.is_assigned()
    }

    pub fn stops_allowing_connections(&self) -> bool {
        self.state.stops_allowing_connections()
    }

    /// Total ids across all teams
    pub fn team_member_count(&self) -> usize {
        self.teams.iter().map(|team| team.len()).sum()
    }
}

/// Process-wide map from session id to live session handle
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session; returns the handle it replaced, if any
    pub fn register(&self, handle: SessionHandle) -> Result<Option<SessionHandle>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;

        info!(
            "Registering session - session: '{}', region: '{}', version: '{}', match: '{}'",
            handle.session_id, handle.server.region, handle.server.version, handle.match_id
        );
        Ok(sessions.insert(handle.session_id.clone(), handle))
    }

    /// Remove a session only if it is still bound to the given connection.
    ///
    /// Returns true for the one caller that actually removed it.
    pub fn unregister(&self, session_id: &str, connection_id: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;

        let bound = sessions
            .get(session_id)
            .map(|h| h.connection.id() == connection_id)
            .unwrap_or(false);
        if bound {
            sessions.remove(session_id);
            debug!("Unregistered session - session: '{}'", session_id);
        }
        Ok(bound)
    }

    /// Remove a session regardless of its connection
    pub fn remove(&self, session_id: &str) -> Result<Option<SessionHandle>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        Ok(sessions.remove(session_id))
    }

    /// Copy of a session handle
    pub fn get(&self, session_id: &str) -> Result<Option<SessionHandle>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        Ok(sessions.get(session_id).cloned())
    }

    pub fn contains(&self, session_id: &str) -> Result<bool> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        Ok(sessions.contains_key(session_id))
    }

    /// Mutate a session under the registry lock.
    ///
    /// Returns `None` when the session is not registered.
    pub fn update<F, R>(&self, session_id: &str, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut SessionHandle) -> R,
    {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        Ok(sessions.get_mut(session_id).map(f))
    }

    /// Atomically move a session from Idle to Admitting.
    ///
    /// Returns false when the session is missing or not accepting admission.
    pub fn try_begin_admission(&self, session_id: &str) -> Result<bool> {
        let started = self.update(session_id, |handle| {
            if handle.accepts_admission() {
                handle.state = SessionState::Admitting;
                true
            } else {
                false
            }
        })?;
        Ok(started.unwrap_or(false))
    }

    /// Move a session back to Idle if its admission cycle did not assign it
    pub fn end_admission(&self, session_id: &str) -> Result<()> {
        self.update(session_id, |handle| {
            if handle.state == SessionState::Admitting {
                handle.state = SessionState::Idle;
            }
        })?;
        Ok(())
    }

    /// Copies of every live session
    pub fn list(&self) -> Result<Vec<SessionHandle>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        let mut snapshot: Vec<SessionHandle> = sessions.values().cloned().collect();
        snapshot.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(snapshot)
    }

    /// Copies of every live session in a region
    pub fn list_region(&self, region: &str) -> Result<Vec<SessionHandle>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|h| h.server.region == region)
            .collect())
    }

    /// Session counts per state
    pub fn state_counts(&self) -> Result<HashMap<SessionState, usize>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        let mut counts = HashMap::new();
        for handle in sessions.values() {
            *counts.entry(handle.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn len(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("sessions"))?;
        Ok(sessions.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
