//! In-memory session store

use super::records::{PlayerAssignment, RecordQuery, SessionRecord};
use super::SessionStore;
use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Session store kept in process memory
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    players: RwLock<Vec<PlayerAssignment>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted session records
    pub fn session_count(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        Ok(sessions.len())
    }

    fn sorted(mut records: Vec<SessionRecord>) -> Vec<SessionRecord> {
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        records
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn find_sessions(&self, query: &RecordQuery) -> Result<Vec<SessionRecord>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        let matching = sessions
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn find_session(&self, query: &RecordQuery) -> Result<Option<SessionRecord>> {
        Ok(self.find_sessions(query).await?.into_iter().next())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        Ok(Self::sorted(sessions.values().cloned().collect()))
    }

    async fn save_session(&self, record: SessionRecord) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        sessions.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("session records"))?;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn create_player(&self, assignment: PlayerAssignment) -> Result<()> {
        let mut players = self
            .players
            .write()
            .map_err(|_| MatchmakingError::lock_failed("player records"))?;
        players.push(assignment);
        Ok(())
    }

    async fn find_player(
        &self,
        session_id: &str,
        account_id: &str,
    ) -> Result<Option<PlayerAssignment>> {
        let players = self
            .players
            .read()
            .map_err(|_| MatchmakingError::lock_failed("player records"))?;
        Ok(players
            .iter()
            .rev()
            .find(|p| p.session_id == session_id && p.account_id == account_id)
            .cloned())
    }

    async fn players_in_session(&self, session_id: &str) -> Result<Vec<PlayerAssignment>> {
        let players = self
            .players
            .read()
            .map_err(|_| MatchmakingError::lock_failed("player records"))?;
        Ok(players
            .iter()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("s1", "NAE", "solo", "1.0");

        store.save_session(record.clone()).await.unwrap();
        assert_eq!(store.get_session("s1").await.unwrap(), Some(record));
        assert_eq!(store.session_count().unwrap(), 1);

        assert!(store.delete_session("s1").await.unwrap());
        assert!(!store.delete_session("s1").await.unwrap());
        assert!(store.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_sessions_by_query() {
        let store = InMemorySessionStore::new();

        let mut open = SessionRecord::new("open", "NAE", "solo", "1.0");
        open.accessible = true;
        store.save_session(open).await.unwrap();
        store
            .save_session(SessionRecord::new("closed", "NAE", "solo", "1.0"))
            .await
            .unwrap();
        store
            .save_session(SessionRecord::new("eu", "EU", "solo", "1.0"))
            .await
            .unwrap();

        let nae = store.find_sessions(&RecordQuery::region("NAE")).await.unwrap();
        assert_eq!(nae.len(), 2);

        let query = RecordQuery::region("NAE")
            .with_playlist("solo")
            .with_version("1.0")
            .accessible(true);
        let found = store.find_session(&query).await.unwrap().unwrap();
        assert_eq!(found.session_id, "open");

        assert_eq!(store.list_sessions().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_player_assignments() {
        let store = InMemorySessionStore::new();
        store
            .create_player(PlayerAssignment::new("a", "s1", vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        store
            .create_player(PlayerAssignment::new("c", "s1", vec!["c".into()]))
            .await
            .unwrap();

        let player = store.find_player("s1", "a").await.unwrap().unwrap();
        assert_eq!(player.team, vec!["a", "b"]);
        assert!(store.find_player("s2", "a").await.unwrap().is_none());
        assert_eq!(store.players_in_session("s1").await.unwrap().len(), 2);
    }
}
