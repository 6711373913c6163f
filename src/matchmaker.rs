//! Matchmaker: owns the engine components and runs admission cycles
//!
//! The gateway and the admin API only talk to the engine through this type.
//! It applies the at-most-one-admission guard around playlist selection and
//! keeps the counters reported on `/stats` and in Prometheus.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::playlist::{merge_party, PlaylistSelector, PlaylistStatistics};
use crate::protocol::{AssignResult, ServerMessage};
use crate::queue::{strategy_for, TicketQueue};
use crate::registry::{SessionRegistry, TicketRegistry};
use crate::session::{SessionLifecycle, SessionState};
use crate::store::SessionStore;
use crate::types::{QueueKey, SelectionOutcome, SessionId};
use crate::utils::generate_match_id;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters and gauges of the matchmaker
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchmakerStats {
    /// Admission cycles run
    pub admission_cycles: u64,
    /// Cycles that selected a playlist
    pub playlists_selected: u64,
    /// Cycles that failed
    pub admission_errors: u64,
    /// Ticks skipped because the session was busy
    pub admissions_skipped: u64,
    /// Backfill messages sent
    pub backfills_sent: u64,
    /// Tickets currently connected
    pub tickets_waiting: usize,
    /// Sessions currently connected
    pub live_sessions: usize,
    pub sessions_by_state: HashMap<SessionState, usize>,
    /// Rolling statistics tracked
    pub tracked_playlists: usize,
}

/// The matchmaking engine
pub struct Matchmaker {
    store: Arc<dyn SessionStore>,
    tickets: Arc<TicketRegistry>,
    sessions: Arc<SessionRegistry>,
    statistics: Arc<PlaylistStatistics>,
    selector: Arc<PlaylistSelector>,
    lifecycle: SessionLifecycle,
    queue: TicketQueue,
    settings: MatchmakingSettings,
    metrics: Arc<MetricsCollector>,
    counters: RwLock<MatchmakerStats>,
}

impl Matchmaker {
    /// Build the engine around a record store
    pub fn new(
        store: Arc<dyn SessionStore>,
        settings: MatchmakingSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let tickets = Arc::new(TicketRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());
        let statistics = Arc::new(PlaylistStatistics::new(
            settings.statistics_window(),
            settings.threshold_floor,
        ));
        let selector = Arc::new(PlaylistSelector::new(
            store.clone(),
            tickets.clone(),
            sessions.clone(),
            statistics.clone(),
            settings.clone(),
        ));
        let lifecycle = SessionLifecycle::new(sessions.clone(), tickets.clone(), settings.clone());
        let strategy = strategy_for(settings.mode, store.clone(), &settings);
        let queue = TicketQueue::new(tickets.clone(), strategy, &settings);

        info!(
            "Matchmaker created - mode: {}, floor: {}, window: {}s",
            settings.mode, settings.threshold_floor, settings.statistics_window_seconds
        );

        Self {
            store,
            tickets,
            sessions,
            statistics,
            selector,
            lifecycle,
            queue,
            settings,
            metrics,
            counters: RwLock::new(MatchmakerStats::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn tickets(&self) -> &Arc<TicketRegistry> {
        &self.tickets
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn statistics(&self) -> &Arc<PlaylistStatistics> {
        &self.statistics
    }

    pub fn selector(&self) -> &PlaylistSelector {
        &self.selector
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn queue(&self) -> &TicketQueue {
        &self.queue
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Run one admission cycle for a session, unless one is already running.
    ///
    /// Returns `None` when the session was busy or not accepting admission.
    /// Missing sessions or records count as WAITING.
    pub async fn try_admit(&self, session_id: &str) -> Result<Option<SelectionOutcome>> {
        if !self.sessions.try_begin_admission(session_id)? {
            self.bump(|c| c.admissions_skipped += 1)?;
            return Ok(None);
        }

        let timer = self.metrics.start_timer();
        // The cycle owns its own task so a dropped caller cannot strand the session
        let selector = self.selector.clone();
        let sessions = self.sessions.clone();
        let id = session_id.to_string();
        let cycle = tokio::spawn(async move {
            let result = selector.select_playlist(&id, None).await;
            let ended = sessions.end_admission(&id);
            (result, ended)
        });
        let (result, ended) = match cycle.await {
            Ok(joined) => joined,
            Err(e) => {
                self.sessions.end_admission(session_id)?;
                return Err(MatchmakingError::InternalError {
                    message: format!("Admission task failed: {}", e),
                }
                .into());
            }
        };
        ended?;
        let elapsed = timer.stop();

        match result {
            Ok(outcome) => {
                let selected = outcome.is_selected();
                self.bump(|c| {
                    c.admission_cycles += 1;
                    if selected {
                        c.playlists_selected += 1;
                    }
                })?;
                let label = if selected { "ok" } else { "waiting" };
                self.metrics.record_selection(label, elapsed);
                Ok(Some(outcome))
            }
            Err(e) => {
                self.bump(|c| {
                    c.admission_cycles += 1;
                    c.admission_errors += 1;
                })?;
                let not_found = e
                    .downcast_ref::<MatchmakingError>()
                    .map(|m| m.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    debug!(
                        "Admission waiting on missing session - session: '{}', error: {}",
                        session_id, e
                    );
                    self.metrics.record_selection("not_found", elapsed);
                    Ok(Some(SelectionOutcome::waiting()))
                } else {
                    warn!(
                        "Admission cycle failed - session: '{}', error: {}",
                        session_id, e
                    );
                    self.metrics.record_selection("error", elapsed);
                    Err(e)
                }
            }
        }
    }

    /// Attempt admission for every idle session of a region.
    ///
    /// Failures are logged per session and do not stop the others.
    pub async fn admit_region(&self, region: &str) -> Result<Vec<(SessionId, SelectionOutcome)>> {
        let candidates: Vec<SessionId> = self
            .sessions
            .list_region(region)?
            .into_iter()
            .filter(|h| h.accepts_admission())
            .map(|h| h.session_id)
            .collect();

        let mut outcomes = Vec::new();
        for session_id in candidates {
            match self.try_admit(&session_id).await {
                Ok(Some(outcome)) => outcomes.push((session_id, outcome)),
                Ok(None) => {}
                Err(e) => debug!(
                    "Region admission skipped session - region: '{}', session: '{}', error: {}",
                    region, session_id, e
                ),
            }
        }
        Ok(outcomes)
    }

    /// Backfill sessions of a region that are letting tickets join
    pub async fn backfill_region(&self, region: &str) -> Result<usize> {
        if !self.settings.backfill_enabled {
            return Ok(0);
        }

        let mut sent = 0;
        for handle in self.sessions.list_region(region)? {
            if handle.is_sending && handle.is_assigning() && self.backfill(&handle.session_id)? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Merge newly queued tickets into an assigned session and send `BackfillMatch`.
    ///
    /// Does nothing unless backfill is enabled and the session is Assigned.
    pub fn backfill(&self, session_id: &str) -> Result<bool> {
        if !self.settings.backfill_enabled {
            return Ok(false);
        }

        let handle = match self.sessions.get(session_id)? {
            Some(handle) if handle.state == SessionState::Assigned => handle,
            _ => return Ok(false),
        };
        let playlist = match handle.playlist.as_deref() {
            Some(playlist) => playlist.to_string(),
            None => return Ok(false),
        };

        let key = QueueKey::new(
            handle.server.version.as_str(),
            playlist.as_str(),
            handle.server.region.as_str(),
        );
        let matching = self.tickets.list_matching(&key)?;
        let teams = self.sessions.update(session_id, |h| {
            for ticket in &matching {
                merge_party(&mut h.teams, &ticket.attributes.party_member_ids);
            }
            h.teams.clone()
        })?;
        let teams = match teams {
            Some(teams) => teams,
            None => return Ok(false),
        };

        let message = ServerMessage::backfill_match(teams, generate_match_id());
        handle.connection.send_json(&message)?;
        self.bump(|c| c.backfills_sent += 1)?;
        info!(
            "Backfill sent - session: '{}', playlist: '{}', tickets: {}",
            session_id,
            playlist,
            matching.len()
        );
        Ok(true)
    }

    /// Handle an `AssignMatchResult` from a session socket
    pub fn on_assign_result(
        &self,
        session_id: &str,
        result: AssignResult,
    ) -> Result<Option<JoinHandle<Result<usize>>>> {
        let label = match &result {
            AssignResult::Ready => "ready",
            AssignResult::Failed => "failed",
            AssignResult::Other(_) => "other",
        };
        self.metrics.record_assign_result(label);
        self.lifecycle.on_assign_result(session_id, result)
    }

    /// Snapshot of counters and current registry sizes
    pub fn stats(&self) -> Result<MatchmakerStats> {
        let mut stats = self
            .counters
            .read()
            .map_err(|_| MatchmakingError::lock_failed("matchmaker stats"))?
            .clone();
        stats.tickets_waiting = self.tickets.len()?;
        stats.live_sessions = self.sessions.len()?;
        stats.sessions_by_state = self.sessions.state_counts()?;
        stats.tracked_playlists = self.statistics.len()?;
        Ok(stats)
    }

    fn bump<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut MatchmakerStats),
    {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| MatchmakingError::lock_failed("matchmaker stats"))?;
        f(&mut counters);
        Ok(())
    }
}
