//! A ticket's time in the queue: greeting and queue-size updates

use super::strategy::QueueStrategy;
use crate::config::MatchmakingSettings;
use crate::error::Result;
use crate::protocol::ServerMessage;
use crate::registry::{TicketHandle, TicketRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Queue state kept by a ticket's connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePosition {
    /// Queue size last reported to the ticket
    pub last_sent: usize,
}

/// Registers tickets and keeps them informed about their queue
pub struct TicketQueue {
    tickets: Arc<TicketRegistry>,
    strategy: Arc<dyn QueueStrategy>,
    connecting_delay: Duration,
    waiting_delay: Duration,
}

impl TicketQueue {
    pub fn new(
        tickets: Arc<TicketRegistry>,
        strategy: Arc<dyn QueueStrategy>,
        settings: &MatchmakingSettings,
    ) -> Self {
        Self {
            tickets,
            strategy,
            connecting_delay: Duration::from_millis(settings.connecting_delay_ms),
            waiting_delay: Duration::from_millis(settings.waiting_delay_ms),
        }
    }

    pub fn strategy(&self) -> &Arc<dyn QueueStrategy> {
        &self.strategy
    }

    /// Register a ticket, greet it and hand it to the deployment strategy.
    ///
    /// Greeting is Connecting, Waiting, then Queued with the current queue
    /// size. Send failures abort the join; the caller unregisters.
    pub async fn join(&self, ticket: &TicketHandle) -> Result<QueuePosition> {
        self.tickets.register(ticket.clone())?;

        let key = ticket.attributes.queue_key();
        let count = self.tickets.count_matching(&key)?;
        info!(
            "Ticket queued - ticket: '{}', account: '{}', queue: {}, size: {}",
            ticket.ticket_id, ticket.attributes.account_id, key, count
        );

        ticket.connection.send_json(&ServerMessage::connecting())?;
        pause(self.connecting_delay).await;
        ticket.connection.send_json(&ServerMessage::waiting())?;
        pause(self.waiting_delay).await;
        ticket
            .connection
            .send_json(&ServerMessage::queued(ticket.ticket_id.as_str(), count))?;

        self.strategy.on_enqueued(ticket).await?;
        Ok(QueuePosition { last_sent: count })
    }

    /// Push a Queued update if the queue size changed and no session is lined up.
    ///
    /// Returns whether an update was sent.
    pub async fn poll(&self, ticket: &TicketHandle, position: &mut QueuePosition) -> Result<bool> {
        if self.strategy.has_target(ticket).await? {
            return Ok(false);
        }

        let count = self.tickets.count_matching(&ticket.attributes.queue_key())?;
        if count == position.last_sent {
            return Ok(false);
        }

        debug!(
            "Queue size changed - ticket: '{}', from: {}, to: {}",
            ticket.ticket_id, position.last_sent, count
        );
        ticket
            .connection
            .send_json(&ServerMessage::queued(ticket.ticket_id.as_str(), count))?;
        position.last_sent = count;
        Ok(true)
    }

    /// Remove a ticket; true if it was still registered
    pub fn leave(&self, connection_id: &str) -> Result<bool> {
        Ok(self.tickets.unregister(connection_id)?.is_some())
    }

    /// Tickets in the same queue as this one
    pub fn queue_size(&self, ticket: &TicketHandle) -> Result<usize> {
        self.tickets.count_matching(&ticket.attributes.queue_key())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
