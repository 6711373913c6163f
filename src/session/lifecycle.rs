//! Drives a session from assignment to lock-out
//!
//! Selection moves a session into Assigning. From there the dedicated server
//! answers with an `AssignMatchResult`: "ready" lets queued tickets join and
//! eventually locks the session, "failed" hands it back to the admission
//! ticker with an empty team list.

use super::state::SessionState;
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::protocol::{AssignResult, ServerMessage};
use crate::registry::{SessionRegistry, TicketRegistry};
use crate::types::QueueKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle transitions that happen after a playlist has been selected
#[derive(Clone)]
pub struct SessionLifecycle {
    sessions: Arc<SessionRegistry>,
    tickets: Arc<TicketRegistry>,
    settings: MatchmakingSettings,
}

impl SessionLifecycle {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        tickets: Arc<TicketRegistry>,
        settings: MatchmakingSettings,
    ) -> Self {
        Self {
            sessions,
            tickets,
            settings,
        }
    }

    /// Registered -> Idle, once the server has been acknowledged
    pub fn mark_idle(&self, session_id: &str) -> Result<bool> {
        let moved = self.sessions.update(session_id, |h| {
            if h.state == SessionState::Registered {
                h.state = SessionState::Idle;
                true
            } else {
                false
            }
        })?;
        Ok(moved.unwrap_or(false))
    }

    /// React to an `AssignMatchResult` from the dedicated server.
    ///
    /// A "ready" result spawns the join notifications and returns their task.
    pub fn on_assign_result(
        &self,
        session_id: &str,
        result: AssignResult,
    ) -> Result<Option<JoinHandle<Result<usize>>>> {
        let state = self
            .sessions
            .get(session_id)?
            .map(|h| h.state)
            .ok_or_else(|| MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        match result {
            AssignResult::Ready if state == SessionState::Assigning => {
                info!("Match ready - session: '{}'", session_id);
                let lifecycle = self.clone();
                let session_id = session_id.to_string();
                Ok(Some(tokio::spawn(async move {
                    lifecycle.complete_assignment(&session_id).await
                })))
            }
            AssignResult::Failed if state == SessionState::Assigning => {
                warn!("Match failed, returning to idle - session: '{}'", session_id);
                self.sessions.update(session_id, |h| {
                    h.state = SessionState::Idle;
                    h.teams.clear();
                    h.playlist = None;
                })?;
                Ok(None)
            }
            AssignResult::Other(result) => {
                warn!(
                    "Unknown assign result - session: '{}', result: '{}'",
                    session_id, result
                );
                Ok(None)
            }
            result => {
                debug!(
                    "Ignoring assign result - session: '{}', result: {:?}, state: {}",
                    session_id, result, state
                );
                Ok(None)
            }
        }
    }

    /// Let every matching ticket join, then lock the session.
    ///
    /// Returns the number of tickets told to play. Stops early, without
    /// error, if the session's connection goes away.
    pub async fn complete_assignment(&self, session_id: &str) -> Result<usize> {
        let handle = self.sessions.get(session_id)?.ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        let cancel = handle.connection.cancellation();

        if !pause(&cancel, self.settings.ready_settle_ms).await {
            return Ok(0);
        }

        let updated = self.sessions.update(session_id, |h| {
            h.state = SessionState::Assigned;
            h.is_sending = true;
        })?;
        if updated.is_none() {
            return Ok(0);
        }

        let playlist = handle.playlist.clone().unwrap_or_default();
        let key = QueueKey::new(
            handle.server.version.as_str(),
            playlist.as_str(),
            handle.server.region.as_str(),
        );
        let play = ServerMessage::play(session_id, self.settings.join_delay_seconds);

        let mut notified = 0;
        for ticket in self.tickets.list_matching(&key)? {
            if !pause(&cancel, self.settings.join_pacing_ms).await {
                break;
            }
            match ticket.connection.send_json(&play) {
                Ok(()) => notified += 1,
                Err(e) => warn!(
                    "Failed to send play - session: '{}', ticket: '{}', error: {}",
                    session_id, ticket.ticket_id, e
                ),
            }
        }

        self.sessions.update(session_id, |h| h.is_sending = false)?;
        info!(
            "Tickets told to join - session: '{}', playlist: '{}', tickets: {}",
            session_id, playlist, notified
        );

        if pause(&cancel, self.settings.lock_delay_ms).await {
            self.sessions
                .update(session_id, |h| h.state = SessionState::Locked)?;
            debug!("Session locked - session: '{}'", session_id);
        }

        Ok(notified)
    }
}

/// Sleep unless the connection is cancelled first; false when cancelled
async fn pause(cancel: &CancellationToken, ms: u64) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if ms == 0 {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
    }
}
