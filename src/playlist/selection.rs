//! Playlist selection: the admission-control decision
//!
//! One cycle snapshots the ticket queue of a region, compares it with the
//! servers already persisted for that region and picks at most one playlist
//! that both clears its adaptive threshold and needs a server. Per-playlist
//! metrics are computed concurrently and ranked only once all of them are in.

use super::statistics::PlaylistStatistics;
use super::teams::merge_party;
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::protocol::ServerMessage;
use crate::registry::{SessionRegistry, TicketHandle, TicketRegistry};
use crate::session::SessionState;
use crate::store::{PlayerAssignment, RecordQuery, SessionRecord, SessionStore};
use crate::types::{QueueKey, SelectionOutcome};
use crate::utils::{bucket_id, current_timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Admission metrics of one playlist for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistMetric {
    pub playlist: String,
    pub player_count: usize,
    pub server_count: usize,
    pub players_per_server: f64,
    pub needs_server: bool,
    pub threshold: usize,
}

impl PlaylistMetric {
    /// Compute the metrics of a playlist from its queue and server counts
    pub fn evaluate(
        playlist: impl Into<String>,
        player_count: usize,
        server_count: usize,
        max_players: usize,
        threshold: usize,
    ) -> Self {
        let players_per_server = if server_count == 0 {
            player_count as f64
        } else {
            player_count as f64 / server_count as f64
        };
        let needs_server = server_count == 0 || players_per_server >= max_players as f64;

        Self {
            playlist: playlist.into(),
            player_count,
            server_count,
            players_per_server,
            needs_server,
            threshold,
        }
    }

    /// Whether this playlist may receive a match
    pub fn qualifies(&self) -> bool {
        self.player_count >= self.threshold && self.needs_server
    }
}

/// Keep qualifying metrics, best first.
///
/// Sessions that need a server sort first, then larger queues. The sort is
/// stable so equal keys keep their input order.
pub fn rank_candidates(metrics: Vec<PlaylistMetric>) -> Vec<PlaylistMetric> {
    let mut candidates: Vec<PlaylistMetric> =
        metrics.into_iter().filter(|m| m.qualifies()).collect();
    candidates.sort_by(|a, b| {
        b.needs_server
            .cmp(&a.needs_server)
            .then_with(|| b.player_count.cmp(&a.player_count))
    });
    candidates
}

/// The decision of one admission cycle, before anything is mutated
#[derive(Debug, Clone)]
pub struct AdmissionPlan {
    pub anchor: SessionRecord,
    pub region: String,
    pub metric: PlaylistMetric,
}

/// Runs admission cycles against the registries and the record store
pub struct PlaylistSelector {
    store: Arc<dyn SessionStore>,
    tickets: Arc<TicketRegistry>,
    sessions: Arc<SessionRegistry>,
    statistics: Arc<PlaylistStatistics>,
    settings: MatchmakingSettings,
    last_selected: Mutex<HashMap<String, String>>,
}

impl PlaylistSelector {
    pub fn new(
        store: Arc<dyn SessionStore>,
        tickets: Arc<TicketRegistry>,
        sessions: Arc<SessionRegistry>,
        statistics: Arc<PlaylistStatistics>,
        settings: MatchmakingSettings,
    ) -> Self {
        Self {
            store,
            tickets,
            sessions,
            statistics,
            settings,
            last_selected: Mutex::new(HashMap::new()),
        }
    }

    pub fn statistics(&self) -> &Arc<PlaylistStatistics> {
        &self.statistics
    }

    /// Last playlist selected in a region
    pub fn last_selected(&self, region: &str) -> Result<Option<String>> {
        let last = self
            .last_selected
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("last selected playlist"))?;
        Ok(last.get(region).cloned())
    }

    /// Run one admission cycle for a live session socket.
    ///
    /// On success the chosen playlist is persisted, matching tickets are merged
    /// into the session's teams, the session moves to Assigning, the server
    /// receives `AssignMatch` and every matching ticket is told its session.
    pub async fn select_playlist(
        &self,
        session_id: &str,
        region: Option<&str>,
    ) -> Result<SelectionOutcome> {
        let plan = match self.plan(session_id, region).await? {
            Some(plan) => plan,
            None => return Ok(SelectionOutcome::waiting()),
        };

        let handle = self.sessions.get(session_id)?.ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;

        let playlist = plan.metric.playlist.clone();
        self.commit(&plan).await?;

        let key = QueueKey::new(handle.server.version.as_str(), playlist.as_str(), plan.region.as_str());
        let matching = self.tickets.list_matching(&key)?;

        let updated = self.sessions.update(session_id, |h| {
            for ticket in &matching {
                merge_party(&mut h.teams, &ticket.attributes.party_member_ids);
            }
            h.playlist = Some(playlist.clone());
            h.state = SessionState::Assigning;
        })?;
        if updated.is_none() {
            return Err(MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
            .into());
        }

        self.record_players(session_id, &matching).await;

        info!(
            "Assigning session - session: '{}', region: '{}', playlist: '{}', tickets: {}",
            session_id,
            plan.region,
            playlist,
            matching.len()
        );

        sleep_ms(self.settings.assign_settle_ms).await;

        // Teams may have grown while we settled; snapshot them now.
        let handle = self.sessions.get(session_id)?.ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        let assignment = ServerMessage::assign_match(
            handle.teams.clone(),
            bucket_id(&handle.server.build_id, &plan.region, &playlist),
            handle.match_id.as_str(),
        );
        if let Err(e) = handle.connection.send_json(&assignment) {
            warn!(
                "Failed to send AssignMatch - session: '{}', error: {}",
                session_id, e
            );
            handle.connection.close();
            return Err(e);
        }

        let notified = self.notify_assignment(session_id, &key)?;
        debug!(
            "Session assignment sent - session: '{}', tickets: {}",
            session_id, notified
        );

        Ok(SelectionOutcome::selected(playlist))
    }

    /// Run one admission cycle for a record with no live socket.
    ///
    /// The chosen playlist is persisted and every matching ticket gets a player
    /// record and a `SessionAssignment`.
    pub async fn select_for_record(&self, session_id: &str) -> Result<SelectionOutcome> {
        let plan = match self.plan(session_id, None).await? {
            Some(plan) => plan,
            None => return Ok(SelectionOutcome::waiting()),
        };

        let playlist = plan.metric.playlist.clone();
        self.commit(&plan).await?;

        let key = QueueKey::new(plan.anchor.version.as_str(), playlist.as_str(), plan.region.as_str());
        let matching = self.tickets.list_matching(&key)?;
        self.record_players(session_id, &matching).await;

        let message = ServerMessage::session_assignment(session_id);
        for ticket in &matching {
            if let Err(e) = ticket.connection.send_json(&message) {
                warn!(
                    "Failed to send session assignment - ticket: '{}', error: {}",
                    ticket.ticket_id, e
                );
            }
        }

        info!(
            "Selected playlist for record - session: '{}', region: '{}', playlist: '{}', tickets: {}",
            session_id,
            plan.region,
            playlist,
            matching.len()
        );
        Ok(SelectionOutcome::selected(playlist))
    }

    /// Decide which playlist, if any, the anchor session should receive.
    ///
    /// Updates the rolling statistics and the flip-flop reset, but nothing
    /// else; `None` means no playlist qualified.
    pub async fn plan(
        &self,
        session_id: &str,
        region: Option<&str>,
    ) -> Result<Option<AdmissionPlan>> {
        if session_id.is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "empty session id".to_string(),
            }
            .into());
        }

        let anchor = self.store.get_session(session_id).await?.ok_or_else(|| {
            MatchmakingError::RecordNotFound {
                session_id: session_id.to_string(),
            }
        })?;

        let region = match region {
            Some(region) if !region.is_empty() => region.to_string(),
            _ => anchor.region.clone(),
        };

        let servers = self.store.find_sessions(&RecordQuery::region(region.as_str())).await?;
        self.reset_last_selected(&region)?;

        let player_counts = self.tickets.counts_by_playlist(&region)?;
        if player_counts.is_empty() {
            return Ok(None);
        }

        let mut server_counts: HashMap<String, usize> = HashMap::new();
        for server in servers
            .iter()
            .filter(|s| s.session_id != anchor.session_id && !s.playlist.is_empty())
        {
            *server_counts.entry(server.playlist.clone()).or_insert(0) += 1;
        }

        let now = current_timestamp();
        self.statistics
            .record_observations(&region, &player_counts, now)?;

        let max_players = anchor.max_players(self.settings.default_max_players)?;

        let mut jobs = JoinSet::new();
        for (playlist, player_count) in player_counts {
            let statistics = Arc::clone(&self.statistics);
            let region = region.clone();
            let server_count = server_counts.get(&playlist).copied().unwrap_or(0);
            jobs.spawn(async move {
                let threshold = statistics.threshold(&region, &playlist, now)?;
                Ok::<_, anyhow::Error>(PlaylistMetric::evaluate(
                    playlist,
                    player_count,
                    server_count,
                    max_players,
                    threshold,
                ))
            });
        }

        let mut metrics = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            let metric = joined.map_err(|e| MatchmakingError::InternalError {
                message: format!("playlist metric task failed: {}", e),
            })??;
            metrics.push(metric);
        }
        metrics.sort_by(|a, b| a.playlist.cmp(&b.playlist));

        for metric in &metrics {
            debug!(
                "Playlist metric - region: '{}', playlist: '{}', players: {}, servers: {}, needs_server: {}, threshold: {}",
                region,
                metric.playlist,
                metric.player_count,
                metric.server_count,
                metric.needs_server,
                metric.threshold
            );
        }

        Ok(rank_candidates(metrics)
            .into_iter()
            .next()
            .map(|metric| AdmissionPlan {
                anchor,
                region,
                metric,
            }))
    }

    /// Persist a plan's playlist and remember it as the region's last selection
    async fn commit(&self, plan: &AdmissionPlan) -> Result<()> {
        {
            let mut last = self
                .last_selected
                .lock()
                .map_err(|_| MatchmakingError::lock_failed("last selected playlist"))?;
            last.insert(plan.region.clone(), plan.metric.playlist.clone());
        }

        let mut record = plan.anchor.clone();
        record.playlist = plan.metric.playlist.clone();
        record.touch();
        self.store.save_session(record).await
    }

    /// Apply the flip-flop reset before a cycle runs
    fn reset_last_selected(&self, region: &str) -> Result<()> {
        let mut last = self
            .last_selected
            .lock()
            .map_err(|_| MatchmakingError::lock_failed("last selected playlist"))?;
        let entry = last
            .entry(region.to_string())
            .or_insert_with(|| self.settings.default_playlist.clone());
        if *entry == self.settings.alternate_playlist {
            *entry = self.settings.default_playlist.clone();
        }
        Ok(())
    }

    async fn record_players(&self, session_id: &str, tickets: &[TicketHandle]) {
        for ticket in tickets {
            let account_id = ticket.attributes.account_id.as_str();
            match self.store.find_player(session_id, account_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Failed to look up player - session: '{}', account: '{}', error: {}",
                        session_id, account_id, e
                    );
                    continue;
                }
            }
            let assignment = PlayerAssignment::new(
                ticket.attributes.account_id.as_str(),
                session_id,
                ticket.attributes.party_member_ids.clone(),
            );
            if let Err(e) = self.store.create_player(assignment).await {
                warn!(
                    "Failed to record player - session: '{}', account: '{}', error: {}",
                    session_id, ticket.attributes.account_id, e
                );
            }
        }
    }

    /// Send `SessionAssignment` to every ticket currently in the queue
    fn notify_assignment(&self, session_id: &str, key: &QueueKey) -> Result<usize> {
        let message = ServerMessage::session_assignment(session_id);
        let mut notified = 0;
        for ticket in self.tickets.list_matching(key)? {
            match ticket.connection.send_json(&message) {
                Ok(()) => notified += 1,
                Err(e) => warn!(
                    "Failed to send session assignment - ticket: '{}', error: {}",
                    ticket.ticket_id, e
                ),
            }
        }
        Ok(notified)
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
