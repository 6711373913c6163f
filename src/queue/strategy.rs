//! How a queued ticket finds the session it will play on
//!
//! The strategy is picked once at startup from the deployment mode; the ticket
//! queue and the admission engine never branch on the mode themselves.

use crate::config::{DeploymentMode, MatchmakingSettings};
use crate::error::Result;
use crate::protocol::ServerMessage;
use crate::registry::TicketHandle;
use crate::store::{PlayerAssignment, RecordQuery, SessionStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deployment-specific part of a ticket's time in the queue
#[async_trait]
pub trait QueueStrategy: Send + Sync {
    fn mode(&self) -> DeploymentMode;

    /// Called once, right after the ticket has been greeted
    async fn on_enqueued(&self, ticket: &TicketHandle) -> Result<()>;

    /// Whether the ticket already has a session to go to.
    ///
    /// Queue-size updates are suppressed while this holds.
    async fn has_target(&self, ticket: &TicketHandle) -> Result<bool>;
}

/// Build the strategy for a deployment mode
pub fn strategy_for(
    mode: DeploymentMode,
    store: Arc<dyn SessionStore>,
    settings: &MatchmakingSettings,
) -> Arc<dyn QueueStrategy> {
    match mode {
        DeploymentMode::Direct => Arc::new(DirectSessionStrategy::new(
            store,
            settings.direct_play_delay_ms,
            settings.join_delay_seconds,
        )),
        DeploymentMode::Matchmade => Arc::new(MatchmadeSessionStrategy::new(store)),
    }
}

/// Tickets are pointed straight at an accessible persisted session
pub struct DirectSessionStrategy {
    store: Arc<dyn SessionStore>,
    play_delay: Duration,
    join_delay_seconds: u64,
}

impl DirectSessionStrategy {
    pub fn new(store: Arc<dyn SessionStore>, play_delay_ms: u64, join_delay_seconds: u64) -> Self {
        Self {
            store,
            play_delay: Duration::from_millis(play_delay_ms),
            join_delay_seconds,
        }
    }

    fn target_query(ticket: &TicketHandle) -> RecordQuery {
        let attributes = &ticket.attributes;
        RecordQuery::region(attributes.region.as_str())
            .with_playlist(attributes.playlist.as_str())
            .with_version(attributes.version.as_str())
            .accessible(true)
    }
}

#[async_trait]
impl QueueStrategy for DirectSessionStrategy {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Direct
    }

    async fn on_enqueued(&self, ticket: &TicketHandle) -> Result<()> {
        let record = match self.store.find_session(&Self::target_query(ticket)).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(
                    "Failed to look up session for ticket - ticket: '{}', error: {}",
                    ticket.ticket_id, e
                );
                return Ok(());
            }
        };

        let assignment = PlayerAssignment::new(
            ticket.attributes.account_id.as_str(),
            record.session_id.as_str(),
            ticket.attributes.party_member_ids.clone(),
        );
        if let Err(e) = self.store.create_player(assignment).await {
            warn!(
                "Failed to record player - session: '{}', account: '{}', error: {}",
                record.session_id, ticket.attributes.account_id, e
            );
        }

        info!(
            "Ticket matched to session - ticket: '{}', session: '{}'",
            ticket.ticket_id, record.session_id
        );
        ticket
            .connection
            .send_json(&ServerMessage::session_assignment(record.session_id.as_str()))?;

        if record.available {
            tokio::time::sleep(self.play_delay).await;
            ticket.connection.send_json(&ServerMessage::play(
                record.session_id.as_str(),
                self.join_delay_seconds,
            ))?;
        }
        Ok(())
    }

    async fn has_target(&self, ticket: &TicketHandle) -> Result<bool> {
        Ok(self
            .store
            .find_session(&Self::target_query(ticket))
            .await?
            .is_some())
    }
}

/// Tickets wait for a session socket to be assigned their playlist
pub struct MatchmadeSessionStrategy {
    store: Arc<dyn SessionStore>,
}

impl MatchmadeSessionStrategy {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueStrategy for MatchmadeSessionStrategy {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Matchmade
    }

    async fn on_enqueued(&self, ticket: &TicketHandle) -> Result<()> {
        debug!(
            "Ticket waiting for a session - ticket: '{}', queue: {}",
            ticket.ticket_id,
            ticket.attributes.queue_key()
        );
        Ok(())
    }

    async fn has_target(&self, ticket: &TicketHandle) -> Result<bool> {
        let query = RecordQuery::region(ticket.attributes.region.as_str())
            .with_playlist(ticket.attributes.playlist.as_str())
            .started(false);
        Ok(self.store.find_session(&query).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, OutboundFrame};
    use crate::store::{InMemorySessionStore, SessionRecord};
    use crate::types::TicketAttributes;
    use tokio::sync::mpsc;

    fn ticket() -> (TicketHandle, mpsc::Receiver<OutboundFrame>) {
        let (connection, rx) = ConnectionHandle::channel(8);
        let attributes = TicketAttributes {
            account_id: "a".to_string(),
            region: "NAE".to_string(),
            playlist: "solo".to_string(),
            version: "1.0".to_string(),
            build_id: String::new(),
            bucket_id: String::new(),
            party_member_ids: vec!["a".to_string(), "b".to_string()],
            fill_team: false,
            expires_at: 0,
            issued_at: 0,
            jti: String::new(),
        };
        (TicketHandle::new("t1", attributes, connection), rx)
    }

    fn texts(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(OutboundFrame::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_direct_without_record_sends_nothing() {
        let store = Arc::new(InMemorySessionStore::new());
        let strategy = DirectSessionStrategy::new(store, 0, 1);
        let (ticket, mut rx) = ticket();

        strategy.on_enqueued(&ticket).await.unwrap();
        assert!(texts(&mut rx).is_empty());
        assert!(!strategy.has_target(&ticket).await.unwrap());
    }

    #[tokio::test]
    async fn test_direct_assigns_and_plays_available_record() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut record = SessionRecord::new("s1", "NAE", "solo", "1.0");
        record.accessible = true;
        record.available = true;
        store.save_session(record).await.unwrap();

        let strategy = DirectSessionStrategy::new(store.clone(), 0, 1);
        let (ticket, mut rx) = ticket();
        strategy.on_enqueued(&ticket).await.unwrap();

        let frames = texts(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["payload"]["state"], "SessionAssignment");
        assert_eq!(frames[1]["name"], "Play");
        assert!(strategy.has_target(&ticket).await.unwrap());

        let player = store.find_player("s1", "a").await.unwrap().unwrap();
        assert_eq!(player.team, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_direct_unavailable_record_only_assigns() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut record = SessionRecord::new("s1", "NAE", "solo", "1.0");
        record.accessible = true;
        store.save_session(record).await.unwrap();

        let strategy = DirectSessionStrategy::new(store, 0, 1);
        let (ticket, mut rx) = ticket();
        strategy.on_enqueued(&ticket).await.unwrap();
        assert_eq!(texts(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_matchmade_target_is_unstarted_record() {
        let store = Arc::new(InMemorySessionStore::new());
        let strategy = MatchmadeSessionStrategy::new(store.clone());
        let (ticket, _rx) = ticket();
        assert!(!strategy.has_target(&ticket).await.unwrap());

        let mut record = SessionRecord::new("s1", "NAE", "solo", "1.0");
        record.started = true;
        store.save_session(record.clone()).await.unwrap();
        assert!(!strategy.has_target(&ticket).await.unwrap());

        record.started = false;
        store.save_session(record).await.unwrap();
        assert!(strategy.has_target(&ticket).await.unwrap());
    }

    #[test]
    fn test_strategy_for_mode() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let settings = MatchmakingSettings::default();
        assert_eq!(
            strategy_for(DeploymentMode::Direct, store.clone(), &settings).mode(),
            DeploymentMode::Direct
        );
        assert_eq!(
            strategy_for(DeploymentMode::Matchmade, store, &settings).mode(),
            DeploymentMode::Matchmade
        );
    }
}
