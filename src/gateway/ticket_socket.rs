//! Ticket socket: a queued party waiting to be pointed at a session

use super::socket::{next_text, shutdown, spawn_writer, Inbound};
use super::state::GatewayState;
use crate::config::AdmissionTrigger;
use crate::error::Result;
use crate::matchmaker::Matchmaker;
use crate::protocol::{PLAIN_PING, PLAIN_PONG};
use crate::registry::{ConnectionHandle, TicketHandle};
use crate::types::TicketAttributes;
use crate::utils::generate_ticket_id;
use axum::extract::ws::WebSocket;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Serve an upgraded ticket socket until it closes
pub async fn serve(socket: WebSocket, state: GatewayState, attributes: TicketAttributes) {
    let matchmaker = state.matchmaker.clone();
    let settings = matchmaker.settings().clone();
    let (sink, mut stream) = socket.split();
    let (connection, frames) = ConnectionHandle::channel(state.outbound_buffer);
    let cancel = connection.cancellation();
    let writer = spawn_writer(sink, frames, cancel.clone(), settings.write_wait());

    let ticket = TicketHandle::new(generate_ticket_id(), attributes, connection.clone());
    matchmaker.metrics().record_connection("ticket");

    let driver = tokio::spawn(drive(matchmaker.clone(), ticket.clone()));

    while let Inbound::Text(text) = next_text(&mut stream, &cancel, settings.pong_wait()).await {
        if text == PLAIN_PING {
            if connection.send_text(PLAIN_PONG).is_err() {
                break;
            }
        } else {
            debug!(
                "Ignoring ticket frame - ticket: '{}', bytes: {}",
                ticket.ticket_id,
                text.len()
            );
        }
    }

    shutdown(&connection, writer).await;
    let _ = driver.await;
    match matchmaker.queue().leave(connection.id()) {
        Ok(true) => info!(
            "Ticket left - ticket: '{}', account: '{}'",
            ticket.ticket_id, ticket.attributes.account_id
        ),
        Ok(false) => {}
        Err(e) => warn!(
            "Failed to remove ticket - ticket: '{}', error: {}",
            ticket.ticket_id, e
        ),
    }
}

/// Greet the ticket, then keep it informed and pinged until the connection goes away
pub async fn drive(matchmaker: Arc<Matchmaker>, ticket: TicketHandle) {
    let cancel = ticket.connection.cancellation();
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = run(&matchmaker, &ticket) => result,
    };

    if let Err(e) = result {
        debug!(
            "Ticket connection failed - ticket: '{}', error: {}",
            ticket.ticket_id, e
        );
        ticket.connection.close();
    }
}

async fn run(matchmaker: &Matchmaker, ticket: &TicketHandle) -> Result<()> {
    let settings = matchmaker.settings();
    let queue = matchmaker.queue();
    let mut position = queue.join(ticket).await?;

    let mut poll = interval(settings.queue_poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ping_period = settings.ticket_ping_interval();
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if queue.poll(ticket, &mut position).await? {
                    matchmaker.metrics().record_queued_update();
                }
                if settings.admission_trigger == AdmissionTrigger::Ticket {
                    admit(matchmaker, &ticket.attributes.region).await;
                }
            }
            _ = ping.tick() => ticket.connection.ping()?,
        }
    }
}

/// One admission attempt for the ticket's region; failures stay with the sessions involved
async fn admit(matchmaker: &Matchmaker, region: &str) {
    if let Err(e) = matchmaker.admit_region(region).await {
        debug!("Region admission failed - region: '{}', error: {}", region, e);
    }
    if let Err(e) = matchmaker.backfill_region(region).await {
        debug!("Region backfill failed - region: '{}', error: {}", region, e);
    }
}
