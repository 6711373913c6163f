//! Registry of connected tickets
//!
//! Registration and removal take the write lock, listing and counting take the
//! read lock. Listings are copies, so callers send to tickets after the lock
//! has been released.

use super::connection::ConnectionHandle;
use crate::error::{MatchmakingError, Result};
use crate::types::{QueueKey, TicketAttributes, TicketId};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// A queued ticket and the connection it arrived on
#[derive(Debug, Clone)]
pub struct TicketHandle {
    pub ticket_id: TicketId,
    pub attributes: TicketAttributes,
    pub connection: ConnectionHandle,
    pub joined_at: DateTime<Utc>,
}

impl TicketHandle {
    pub fn new(
        ticket_id: impl Into<String>,
        attributes: TicketAttributes,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            attributes,
            connection,
            joined_at: current_timestamp(),
        }
    }

    /// Connection identity the registry is keyed by
    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }
}

/// Thread-safe set of connected tickets keyed by connection identity
#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: RwLock<HashMap<String, TicketHandle>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ticket; a second registration of the same connection replaces the first
    pub fn register(&self, ticket: TicketHandle) -> Result<()> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| MatchmakingError::lock_failed("tickets"))?;

        debug!(
            "Registering ticket - ticket: '{}', account: '{}', queue: {}",
            ticket.ticket_id,
            ticket.attributes.account_id,
            ticket.attributes.queue_key()
        );
        tickets.insert(ticket.connection_id().to_string(), ticket);
        Ok(())
    }

    /// Remove a ticket by connection id; returns the removed ticket if present
    pub fn unregister(&self, connection_id: &str) -> Result<Option<TicketHandle>> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| MatchmakingError::lock_failed("tickets"))?;
        Ok(tickets.remove(connection_id))
    }

    /// Snapshot of tickets waiting in a queue, oldest first
    pub fn list_matching(&self, key: &QueueKey) -> Result<Vec<TicketHandle>> {
        self.collect(|t| t.attributes.matches(key))
    }

    /// Number of tickets waiting in a queue
    pub fn count_matching(&self, key: &QueueKey) -> Result<usize> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| MatchmakingError::lock_failed("tickets"))?;
        Ok(tickets
            .values()
            .filter(|t| t.attributes.matches(key))
            .count())
    }

    /// Snapshot of every ticket in a region, oldest first
    pub fn list_region(&self, region: &str) -> Result<Vec<TicketHandle>> {
        self.collect(|t| t.attributes.region == region)
    }

    /// Snapshot of every connected ticket, oldest first
    pub fn list(&self) -> Result<Vec<TicketHandle>> {
        self.collect(|_| true)
    }

    /// Queued ticket count per playlist for a region
    pub fn counts_by_playlist(&self, region: &str) -> Result<HashMap<String, usize>> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| MatchmakingError::lock_failed("tickets"))?;

        let mut counts = HashMap::new();
        for ticket in tickets.values().filter(|t| t.attributes.region == region) {
            *counts.entry(ticket.attributes.playlist.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Total number of connected tickets
    pub fn len(&self) -> Result<usize> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| MatchmakingError::lock_failed("tickets"))?;
        Ok(tickets.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn collect<F>(&self, filter: F) -> Result<Vec<TicketHandle>>
    where
        F: Fn(&TicketHandle) -> bool,
    {
        let mut snapshot: Vec<TicketHandle> = {
            let tickets = self
                .tickets
                .read()
                .map_err(|_| MatchmakingError::lock_failed("tickets"))?;
            tickets.values().filter(|t| filter(t)).cloned().collect()
        };
        snapshot.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.ticket_id.cmp(&b.ticket_id))
        });
        Ok(snapshot)
    }
}
