//! Administrative operations on persisted session records
//!
//! Dedicated servers and operators use these to create, start, close and
//! heartbeat session records. Operations that change what queued tickets may
//! do also notify the tickets waiting for that session's queue.

use crate::error::{MatchmakingError, Result};
use crate::matchmaker::Matchmaker;
use crate::protocol::ServerMessage;
use crate::store::{PlayerAssignment, SessionRecord};
use crate::types::{AccountId, QueueKey, SelectionOutcome};
use crate::utils::{display_playlist, generate_session_id, generate_ticket_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Game attributes a server reports for its session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionAttributesBody {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "bLimitedTimeMode")]
    pub limited_time_mode: bool,
    #[serde(rename = "RatingType")]
    pub rating_type: String,
    #[serde(rename = "MaxPlayers")]
    pub max_players: u32,
    #[serde(rename = "MaxTeamCount")]
    pub max_team_count: u32,
    #[serde(rename = "MaxTeamSize")]
    pub max_team_size: u32,
    #[serde(rename = "MaxSocialPartySize")]
    pub max_social_party_size: u32,
    #[serde(rename = "MaxSquadSize")]
    pub max_squad_size: u32,
}

/// Body of a session creation request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateSessionRequest {
    pub playlist: String,
    pub server_addr: String,
    pub server_port: u16,
    pub active_players: usize,
    pub all_players: usize,
    pub region: String,
    pub attributes: SessionAttributesBody,
    pub join_in_progress: bool,
    pub stats: serde_json::Value,
    pub version: String,
    pub build_id: String,
}

/// Body of a heartbeat; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HeartbeatRequest {
    pub playlist: Option<String>,
    pub server_addr: Option<String>,
    pub server_port: Option<u16>,
    pub active_players: Option<usize>,
    pub all_players: Option<usize>,
    pub region: Option<String>,
    pub attributes: Option<SessionAttributesBody>,
    pub version: Option<String>,
    pub public_players: Option<Vec<AccountId>>,
}

/// Session record as returned by the admin API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionView {
    pub session_id: String,
    pub playlist: String,
    pub region: String,
    pub version: String,
    pub server_addr: String,
    pub server_port: u16,
    pub active_players: usize,
    pub all_players: usize,
    pub public_players: Vec<AccountId>,
    pub accessible: bool,
    pub available: bool,
    pub started: bool,
    pub join_in_progress: bool,
}

impl From<&SessionRecord> for SessionView {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            playlist: record.playlist.clone(),
            region: record.region.clone(),
            version: record.version.clone(),
            server_addr: record.server_address.clone(),
            server_port: record.server_port,
            active_players: record.active_players,
            all_players: record.all_players,
            public_players: record.public_players.clone(),
            accessible: record.accessible,
            available: record.available,
            started: record.started,
            join_in_progress: record.join_in_progress,
        }
    }
}

/// Response of the playlist endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistResponse {
    pub playlist: Option<String>,
    pub status: String,
}

impl From<SelectionOutcome> for PlaylistResponse {
    fn from(outcome: SelectionOutcome) -> Self {
        Self {
            playlist: outcome.playlist.as_deref().map(|p| display_playlist(p).to_string()),
            status: outcome.status.to_string(),
        }
    }
}

/// Administrative record operations bound to the matchmaker
#[derive(Clone)]
pub struct SessionAdmin {
    matchmaker: Arc<Matchmaker>,
}

impl SessionAdmin {
    pub fn new(matchmaker: Arc<Matchmaker>) -> Self {
        Self { matchmaker }
    }

    /// Persist a new session record: accessible to tickets but not yet joinable
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionRecord> {
        if request.region.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Region is required".to_string(),
            }
            .into());
        }

        let mut record = SessionRecord::new(
            generate_session_id(),
            request.region,
            request.playlist,
            request.version,
        );
        record.build_id = request.build_id;
        record.server_address = request.server_addr;
        record.server_port = request.server_port;
        record.active_players = request.active_players;
        record.all_players = request.all_players;
        record.join_in_progress = request.join_in_progress;
        record.attributes = encode_attributes(&request.attributes)?;
        record.accessible = true;
        record.available = false;

        self.matchmaker.store().save_session(record.clone()).await?;
        info!(
            "Created session record - session: '{}', region: '{}', playlist: '{}'",
            record.session_id, record.region, record.playlist
        );
        Ok(record)
    }

    /// Run a record-only playlist selection for a session
    pub async fn playlist(&self, session_id: &str) -> Result<PlaylistResponse> {
        let outcome = self.matchmaker.selector().select_for_record(session_id).await?;
        Ok(outcome.into())
    }

    /// Assignment of an account to a session
    pub async fn player_in_session(
        &self,
        session_id: &str,
        account_id: &str,
    ) -> Result<PlayerAssignment> {
        self.record(session_id).await?;
        self.matchmaker
            .store()
            .find_player(session_id, account_id)
            .await?
            .ok_or_else(|| {
                MatchmakingError::RecordNotFound {
                    session_id: format!("{}/{}", session_id, account_id),
                }
                .into()
            })
    }

    /// Open a session for joining and tell its waiting tickets to play
    pub async fn start_session(&self, session_id: &str) -> Result<usize> {
        let mut record = self.record(session_id).await?;
        record.available = true;
        record.started = true;
        record.touch();
        self.matchmaker.store().save_session(record.clone()).await?;

        let message = ServerMessage::play(
            record.session_id.as_str(),
            self.matchmaker.settings().join_delay_seconds,
        );
        let sent = self.notify(&record, |_| message.clone());
        info!(
            "Started session - session: '{}', playlist: '{}', notified: {}",
            session_id, record.playlist, sent
        );
        Ok(sent)
    }

    /// Withdraw a session and put its waiting tickets back in the queue
    pub async fn close_session(&self, session_id: &str) -> Result<usize> {
        let mut record = self.record(session_id).await?;
        record.available = false;
        record.accessible = false;
        record.touch();
        self.matchmaker.store().save_session(record.clone()).await?;

        let key = record_key(&record);
        let queued = self.matchmaker.tickets().count_matching(&key)?;
        let sent = self.notify(&record, |_| ServerMessage::queued(generate_ticket_id(), queued));
        info!(
            "Closed session - session: '{}', playlist: '{}', requeued: {}",
            session_id, record.playlist, sent
        );
        Ok(sent)
    }

    /// Apply a server heartbeat and refresh the record's timestamp
    pub async fn heartbeat(
        &self,
        session_id: &str,
        request: HeartbeatRequest,
    ) -> Result<SessionRecord> {
        let mut record = self.record(session_id).await?;
        if let Some(playlist) = request.playlist {
            record.playlist = playlist;
        }
        if let Some(addr) = request.server_addr {
            record.server_address = addr;
        }
        if let Some(port) = request.server_port {
            record.server_port = port;
        }
        if let Some(active) = request.active_players {
            record.active_players = active;
        }
        if let Some(all) = request.all_players {
            record.all_players = all;
        }
        if let Some(region) = request.region {
            record.region = region;
        }
        if let Some(attributes) = request.attributes {
            record.attributes = encode_attributes(&attributes)?;
        }
        if let Some(version) = request.version {
            record.version = version;
        }
        if let Some(players) = request.public_players {
            record.public_players = players;
        }
        record.touch();

        self.matchmaker.store().save_session(record.clone()).await?;
        debug!(
            "Heartbeat - session: '{}', players: {}",
            session_id,
            record.occupancy()
        );
        Ok(record)
    }

    /// Delete a session record and drop any live socket bound to it
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        if let Some(handle) = self.matchmaker.sessions().remove(session_id)? {
            handle.connection.close();
        }
        if !self.matchmaker.store().delete_session(session_id).await? {
            return Err(MatchmakingError::RecordNotFound {
                session_id: session_id.to_string(),
            }
            .into());
        }
        info!("Deleted session record - session: '{}'", session_id);
        Ok(())
    }

    /// Number of tickets currently connected
    pub fn queued_total(&self) -> Result<usize> {
        self.matchmaker.tickets().len()
    }

    async fn record(&self, session_id: &str) -> Result<SessionRecord> {
        self.matchmaker
            .store()
            .get_session(session_id)
            .await?
            .ok_or_else(|| {
                MatchmakingError::RecordNotFound {
                    session_id: session_id.to_string(),
                }
                .into()
            })
    }

    /// Send a message to every ticket waiting for the record's queue
    fn notify<F>(&self, record: &SessionRecord, message: F) -> usize
    where
        F: Fn(&str) -> ServerMessage,
    {
        let tickets = match self.matchmaker.tickets().list_matching(&record_key(record)) {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(
                    "Failed to list tickets for session - session: '{}', error: {}",
                    record.session_id, e
                );
                return 0;
            }
        };

        let mut sent = 0;
        let mut name = "";
        for ticket in &tickets {
            let message = message(&ticket.ticket_id);
            name = message.name();
            match ticket.connection.send_json(&message) {
                Ok(()) => sent += 1,
                Err(e) => debug!(
                    "Failed to notify ticket - ticket: '{}', error: {}",
                    ticket.ticket_id, e
                ),
            }
        }
        if sent > 0 {
            self.matchmaker.metrics().record_ticket_notifications(name, sent);
        }
        sent
    }
}

fn record_key(record: &SessionRecord) -> QueueKey {
    QueueKey::new(
        record.version.as_str(),
        record.playlist.as_str(),
        record.region.as_str(),
    )
}

fn encode_attributes(attributes: &SessionAttributesBody) -> Result<String> {
    serde_json::to_string(attributes).map_err(|e| {
        MatchmakingError::InvalidRequest {
            reason: format!("Attributes could not be encoded: {}", e),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::metrics::MetricsCollector;
    use crate::registry::{ConnectionHandle, OutboundFrame, SessionHandle, TicketHandle};
    use crate::store::{InMemorySessionStore, SessionStore};
    use crate::types::{ServerAttributes, TicketAttributes};
    use tokio::sync::mpsc;

    fn admin() -> (SessionAdmin, Arc<Matchmaker>, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            MatchmakingSettings::without_delays(),
            metrics,
        ));
        (SessionAdmin::new(matchmaker.clone()), matchmaker, store)
    }

    fn create_request() -> CreateSessionRequest {
        CreateSessionRequest {
            playlist: "playlist_defaultsolo".to_string(),
            server_addr: "10.0.0.1".to_string(),
            server_port: 7777,
            region: "NAE".to_string(),
            version: "1.0".to_string(),
            attributes: SessionAttributesBody {
                max_players: 100,
                ..SessionAttributesBody::default()
            },
            ..CreateSessionRequest::default()
        }
    }

    fn queue_ticket(
        matchmaker: &Matchmaker,
        account: &str,
    ) -> (TicketHandle, mpsc::Receiver<OutboundFrame>) {
        let (connection, rx) = ConnectionHandle::channel(16);
        let ticket = TicketHandle::new(
            generate_ticket_id(),
            TicketAttributes {
                account_id: account.to_string(),
                region: "NAE".to_string(),
                playlist: "playlist_defaultsolo".to_string(),
                version: "1.0".to_string(),
                build_id: "build".to_string(),
                bucket_id: String::new(),
                party_member_ids: vec![account.to_string()],
                fill_team: false,
                expires_at: 0,
                issued_at: 0,
                jti: String::new(),
            },
            connection,
        );
        matchmaker.tickets().register(ticket.clone()).unwrap();
        (ticket, rx)
    }

    fn next_json(rx: &mut mpsc::Receiver<OutboundFrame>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_session_is_accessible_not_available() {
        let (admin, _, store) = admin();
        let record = admin.create_session(create_request()).await.unwrap();

        assert_eq!(record.session_id.len(), 32);
        assert!(record.accessible);
        assert!(!record.available);
        assert_eq!(record.max_players(50).unwrap(), 100);
        assert!(store.get_session(&record.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_session_requires_region() {
        let (admin, _, _) = admin();
        let request = CreateSessionRequest {
            region: String::new(),
            ..create_request()
        };
        assert!(admin.create_session(request).await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_close_notify_waiting_tickets() {
        let (admin, matchmaker, store) = admin();
        let record = admin.create_session(create_request()).await.unwrap();
        let (_ticket, mut rx) = queue_ticket(&matchmaker, "a1");

        assert_eq!(admin.start_session(&record.session_id).await.unwrap(), 1);
        let play = next_json(&mut rx);
        assert_eq!(play["name"], "Play");
        assert_eq!(play["payload"]["sessionId"], record.session_id.as_str());
        let stored = store.get_session(&record.session_id).await.unwrap().unwrap();
        assert!(stored.available);

        assert_eq!(admin.close_session(&record.session_id).await.unwrap(), 1);
        let queued = next_json(&mut rx);
        assert_eq!(queued["payload"]["state"], "Queued");
        assert_eq!(queued["payload"]["queuedPlayers"], 1);
        let stored = store.get_session(&record.session_id).await.unwrap().unwrap();
        assert!(!stored.available);
        assert!(!stored.accessible);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_and_persists() {
        let (admin, _, store) = admin();
        let record = admin.create_session(create_request()).await.unwrap();

        let request = HeartbeatRequest {
            active_players: Some(12),
            public_players: Some(vec!["a".to_string(), "b".to_string()]),
            ..HeartbeatRequest::default()
        };
        admin.heartbeat(&record.session_id, request).await.unwrap();

        let stored = store.get_session(&record.session_id).await.unwrap().unwrap();
        assert_eq!(stored.active_players, 12);
        assert_eq!(stored.occupancy(), 2);
        assert!(stored.last_updated >= record.last_updated);
        assert_eq!(stored.playlist, "playlist_defaultsolo");
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let (admin, _, _) = admin();
        for err in [
            admin.start_session("nope").await.unwrap_err(),
            admin.delete_session("nope").await.unwrap_err(),
            admin.player_in_session("nope", "a1").await.unwrap_err(),
        ] {
            let err = err.downcast_ref::<MatchmakingError>().unwrap();
            assert!(err.is_not_found());
        }
    }

    #[tokio::test]
    async fn test_delete_session_drops_live_socket() {
        let (admin, matchmaker, store) = admin();
        let record = admin.create_session(create_request()).await.unwrap();
        let (connection, _rx) = ConnectionHandle::channel(16);
        matchmaker
            .sessions()
            .register(SessionHandle::new(
                record.session_id.as_str(),
                ServerAttributes::default(),
                connection.clone(),
            ))
            .unwrap();

        admin.delete_session(&record.session_id).await.unwrap();

        assert!(connection.is_closed());
        assert!(matchmaker.sessions().get(&record.session_id).unwrap().is_none());
        assert!(store.get_session(&record.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_playlist_strips_prefix_and_records_players() {
        let (admin, matchmaker, _) = admin();
        let record = admin.create_session(create_request()).await.unwrap();
        let (_a, mut rx_a) = queue_ticket(&matchmaker, "a1");
        let (_b, _rx_b) = queue_ticket(&matchmaker, "a2");

        let response = admin.playlist(&record.session_id).await.unwrap();
        assert_eq!(response.status, "OK");
        assert_eq!(response.playlist.as_deref(), Some("defaultsolo"));

        let player = admin
            .player_in_session(&record.session_id, "a1")
            .await
            .unwrap();
        assert_eq!(player.session_id, record.session_id);

        let assignment = next_json(&mut rx_a);
        assert_eq!(assignment["payload"]["state"], "SessionAssignment");
        assert_eq!(admin.queued_total().unwrap(), 2);
    }

    #[test]
    fn test_attribute_names_on_the_wire() {
        let body: SessionAttributesBody = serde_json::from_str(
            r#"{"Type": "Solo", "bLimitedTimeMode": true, "MaxPlayers": 100, "MaxTeamSize": 1}"#,
        )
        .unwrap();
        assert_eq!(body.kind, "Solo");
        assert!(body.limited_time_mode);
        assert_eq!(body.max_players, 100);

        let view = PlaylistResponse::from(SelectionOutcome::waiting());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json["Playlist"].is_null());
        assert_eq!(json["Status"], "WAITING");
    }
}
