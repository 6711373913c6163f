//! Test fixtures for integration testing

#![allow(dead_code)]

use matchgate::config::{DeploymentMode, MatchmakingSettings};
use matchgate::gateway::session_socket;
use matchgate::metrics::MetricsCollector;
use matchgate::registry::{ConnectionHandle, OutboundFrame, TicketHandle};
use matchgate::store::{InMemorySessionStore, SessionRecord, SessionStore};
use matchgate::types::{ServerAttributes, TicketAttributes};
use matchgate::Matchmaker;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A matchmaker over an in-memory store, with every delay removed
pub struct TestSystem {
    pub matchmaker: Arc<Matchmaker>,
    pub store: Arc<InMemorySessionStore>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(MatchmakingSettings::without_delays())
    }

    pub fn direct() -> Self {
        Self::with_settings(MatchmakingSettings {
            mode: DeploymentMode::Direct,
            ..MatchmakingSettings::without_delays()
        })
    }

    pub fn with_settings(settings: MatchmakingSettings) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let matchmaker = Arc::new(Matchmaker::new(store.clone(), settings, metrics));
        Self { matchmaker, store }
    }

    /// Persist a record for a region with an optional playlist
    pub async fn persist(&self, session_id: &str, region: &str, playlist: &str) -> SessionRecord {
        let record = SessionRecord::new(session_id, region, playlist, "1.0");
        self.store
            .save_session(record.clone())
            .await
            .expect("save session");
        record
    }

    /// Open a session socket the way the gateway does
    pub fn connect_session(&self, session_id: &str, region: &str) -> Peer {
        let (connection, frames) = ConnectionHandle::channel(256);
        let server = ServerAttributes {
            region: region.to_string(),
            version: "1.0".to_string(),
            build_id: "++Fortnite+Release-1.0-CL-1".to_string(),
            ..ServerAttributes::default()
        };
        session_socket::register(&self.matchmaker, session_id, server, &connection)
            .expect("register session");
        Peer { connection, frames }
    }

    /// Register a ticket without going through the greeting
    pub fn queue_party(&self, party: &[&str], region: &str, playlist: &str) -> Peer {
        let (ticket, peer) = ticket(party, region, playlist);
        self.matchmaker
            .tickets()
            .register(ticket)
            .expect("register ticket");
        peer
    }
}

/// The broker side of a connection plus the frames it was sent
pub struct Peer {
    pub connection: ConnectionHandle,
    pub frames: mpsc::Receiver<OutboundFrame>,
}

impl Peer {
    /// Every JSON frame queued so far
    pub fn drain(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                if let Ok(value) = serde_json::from_str(&text) {
                    messages.push(value);
                }
            }
        }
        messages
    }

    /// Names of every JSON frame queued so far, with StatusUpdate states inlined
    pub fn drain_names(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|message| match message["name"].as_str() {
                Some("StatusUpdate") => format!(
                    "StatusUpdate:{}",
                    message["payload"]["state"].as_str().unwrap_or_default()
                ),
                Some(name) => name.to_string(),
                None => String::new(),
            })
            .collect()
    }
}

/// A ticket for a party led by its first member
pub fn ticket(party: &[&str], region: &str, playlist: &str) -> (TicketHandle, Peer) {
    let (connection, frames) = ConnectionHandle::channel(256);
    let members: Vec<String> = party.iter().map(|id| id.to_string()).collect();
    let attributes = TicketAttributes {
        account_id: members[0].clone(),
        region: region.to_string(),
        playlist: playlist.to_string(),
        version: "1.0".to_string(),
        build_id: "++Fortnite+Release-1.0-CL-1".to_string(),
        bucket_id: String::new(),
        party_member_ids: members,
        fill_team: false,
        expires_at: 0,
        issued_at: 0,
        jti: String::new(),
    };
    let handle = TicketHandle::new(
        format!("ticket-{}", party[0]),
        attributes,
        connection.clone(),
    );
    (handle, Peer { connection, frames })
}
