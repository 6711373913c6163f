//! Session socket: a dedicated server waiting for, running, or locking a match

use super::socket::{next_text, shutdown, spawn_writer, Inbound};
use super::state::GatewayState;
use crate::config::AdmissionTrigger;
use crate::error::Result;
use crate::matchmaker::Matchmaker;
use crate::protocol::{ServerMessage, SessionInbound, PLAIN_PING, PLAIN_PONG};
use crate::registry::{ConnectionHandle, SessionHandle};
use crate::types::{ServerAttributes, SessionId};
use axum::extract::ws::WebSocket;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Serve an upgraded session socket until it closes
pub async fn serve(
    socket: WebSocket,
    state: GatewayState,
    session_id: SessionId,
    server: ServerAttributes,
) {
    let matchmaker = state.matchmaker.clone();
    let settings = matchmaker.settings().clone();
    let (sink, mut stream) = socket.split();
    let (connection, frames) = ConnectionHandle::channel(state.outbound_buffer);
    let cancel = connection.cancellation();
    let writer = spawn_writer(sink, frames, cancel.clone(), settings.write_wait());

    matchmaker.metrics().record_connection("session");
    if let Err(e) = register(&matchmaker, &session_id, server, &connection) {
        warn!(
            "Failed to register session - session: '{}', error: {}",
            session_id, e
        );
        shutdown(&connection, writer).await;
        return;
    }

    let driver = tokio::spawn(drive(
        matchmaker.clone(),
        session_id.clone(),
        connection.clone(),
    ));

    while let Inbound::Text(text) = next_text(&mut stream, &cancel, settings.pong_wait()).await {
        if let Err(e) = handle_text(&matchmaker, &session_id, &connection, &text) {
            debug!(
                "Session frame failed - session: '{}', error: {}",
                session_id, e
            );
            if connection.is_closed() {
                break;
            }
        }
    }

    shutdown(&connection, writer).await;
    let _ = driver.await;
    match matchmaker
        .sessions()
        .unregister(&session_id, connection.id())
    {
        Ok(true) => info!("Session disconnected - session: '{}'", session_id),
        Ok(false) => {}
        Err(e) => warn!(
            "Failed to remove session - session: '{}', error: {}",
            session_id, e
        ),
    }
}

/// Bind the session to this connection, acknowledge it and make it eligible for admission.
///
/// A previous connection for the same session id is closed.
pub fn register(
    matchmaker: &Matchmaker,
    session_id: &str,
    server: ServerAttributes,
    connection: &ConnectionHandle,
) -> Result<()> {
    let handle = SessionHandle::new(session_id, server, connection.clone());
    if let Some(previous) = matchmaker.sessions().register(handle)? {
        info!(
            "Replacing session connection - session: '{}', state: {}",
            session_id, previous.state
        );
        previous.connection.close();
    }

    connection.send_json(&ServerMessage::registered())?;
    matchmaker.lifecycle().mark_idle(session_id)?;
    Ok(())
}

/// Act on one text frame from the dedicated server
pub fn handle_text(
    matchmaker: &Matchmaker,
    session_id: &str,
    connection: &ConnectionHandle,
    text: &str,
) -> Result<()> {
    if text == PLAIN_PING {
        return connection.send_text(PLAIN_PONG);
    }

    match SessionInbound::parse(text) {
        Ok(SessionInbound::AssignMatchResult(result)) => {
            matchmaker.on_assign_result(session_id, result)?;
        }
        Ok(SessionInbound::Unknown(name)) => {
            debug!(
                "Ignoring session message - session: '{}', name: '{}'",
                session_id, name
            );
        }
        Err(e) => {
            warn!(
                "Unparseable session frame - session: '{}', error: {}",
                session_id, e
            );
        }
    }
    Ok(())
}

/// Ping the server and, when sessions drive admission, tick its admission cycle
pub async fn drive(matchmaker: Arc<Matchmaker>, session_id: SessionId, connection: ConnectionHandle) {
    let cancel = connection.cancellation();
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = run(&matchmaker, &session_id, &connection) => result,
    };

    if let Err(e) = result {
        debug!(
            "Session connection failed - session: '{}', error: {}",
            session_id, e
        );
        connection.close();
    }
}

async fn run(matchmaker: &Matchmaker, session_id: &str, connection: &ConnectionHandle) -> Result<()> {
    let settings = matchmaker.settings();
    let mut admission = interval(settings.admission_tick());
    admission.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ping_period = settings.session_ping_interval();
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = admission.tick(), if settings.admission_trigger == AdmissionTrigger::Session => {
                tick(matchmaker, session_id).await;
            }
            _ = ping.tick() => connection.ping()?,
        }
    }
}

async fn tick(matchmaker: &Matchmaker, session_id: &str) {
    let handle = match matchmaker.sessions().get(session_id) {
        Ok(Some(handle)) => handle,
        _ => return,
    };

    if handle.accepts_admission() {
        if let Err(e) = matchmaker.try_admit(session_id).await {
            debug!(
                "Admission tick failed - session: '{}', error: {}",
                session_id, e
            );
        }
    } else if handle.is_sending && handle.is_assigning() {
        if let Err(e) = matchmaker.backfill(session_id) {
            debug!(
                "Backfill tick failed - session: '{}', error: {}",
                session_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::metrics::MetricsCollector;
    use crate::registry::OutboundFrame;
    use crate::session::SessionState;
    use crate::store::InMemorySessionStore;
    use tokio::sync::mpsc;

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(
            Arc::new(InMemorySessionStore::new()),
            MatchmakingSettings::without_delays(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    fn server() -> ServerAttributes {
        ServerAttributes {
            region: "NAE".to_string(),
            version: "1.0".to_string(),
            ..ServerAttributes::default()
        }
    }

    fn text(rx: &mut mpsc::Receiver<OutboundFrame>) -> String {
        match rx.try_recv() {
            Ok(OutboundFrame::Text(text)) => text,
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_register_acknowledges_and_idles() {
        let matchmaker = matchmaker();
        let (connection, mut rx) = ConnectionHandle::channel(8);

        register(&matchmaker, "s1", server(), &connection).unwrap();
        assert_eq!(text(&mut rx), r#"{"name":"Registered","payload":{}}"#);
        let handle = matchmaker.sessions().get("s1").unwrap().unwrap();
        assert_eq!(handle.state, SessionState::Idle);
    }

    #[test]
    fn test_reregistration_closes_previous_connection() {
        let matchmaker = matchmaker();
        let (first, _rx1) = ConnectionHandle::channel(8);
        let (second, _rx2) = ConnectionHandle::channel(8);

        register(&matchmaker, "s1", server(), &first).unwrap();
        register(&matchmaker, "s1", server(), &second).unwrap();
        assert!(first.is_closed());
        assert!(!second.is_closed());

        // The stale connection's cleanup must not remove the new binding
        assert!(!matchmaker.sessions().unregister("s1", first.id()).unwrap());
        assert!(matchmaker.sessions().contains("s1").unwrap());
    }

    #[test]
    fn test_plain_ping_and_unknown_frames() {
        let matchmaker = matchmaker();
        let (connection, mut rx) = ConnectionHandle::channel(8);
        register(&matchmaker, "s1", server(), &connection).unwrap();
        let _ = text(&mut rx);

        handle_text(&matchmaker, "s1", &connection, "ping").unwrap();
        assert_eq!(text(&mut rx), "pong");

        handle_text(&matchmaker, "s1", &connection, r#"{"name":"Hello","payload":{}}"#).unwrap();
        handle_text(&matchmaker, "s1", &connection, "not json").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_result_outside_assignment_is_ignored() {
        let matchmaker = matchmaker();
        let (connection, _rx) = ConnectionHandle::channel(8);
        register(&matchmaker, "s1", server(), &connection).unwrap();

        let frame = r#"{"name":"AssignMatchResult","payload":{"result":"failed"}}"#;
        handle_text(&matchmaker, "s1", &connection, frame).unwrap();
        let handle = matchmaker.sessions().get("s1").unwrap().unwrap();
        assert_eq!(handle.state, SessionState::Idle);
    }
}
