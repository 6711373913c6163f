//! Boundary to the persisted session and player-assignment records
//!
//! The engine reads session records for admission and cleanup decisions and
//! writes the selected playlist and player assignments back. The bundled
//! in-memory implementation backs the binary and the tests.

pub mod memory;
pub mod records;

pub use memory::InMemorySessionStore;
pub use records::{PlayerAssignment, RecordQuery, SessionRecord};

use crate::error::Result;
use async_trait::async_trait;

/// Access to persisted session records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get a session record by id
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// All records matching the query, oldest first
    async fn find_sessions(&self, query: &RecordQuery) -> Result<Vec<SessionRecord>>;

    /// First record matching the query, oldest first
    async fn find_session(&self, query: &RecordQuery) -> Result<Option<SessionRecord>>;

    /// Every persisted record
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Insert or replace a record
    async fn save_session(&self, record: SessionRecord) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    /// Record that a ticket was pointed at a session
    async fn create_player(&self, assignment: PlayerAssignment) -> Result<()>;

    /// Latest assignment of an account to a session
    async fn find_player(
        &self,
        session_id: &str,
        account_id: &str,
    ) -> Result<Option<PlayerAssignment>>;

    /// All assignments written for a session
    async fn players_in_session(&self, session_id: &str) -> Result<Vec<PlayerAssignment>>;
}
