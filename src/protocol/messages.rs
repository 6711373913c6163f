//! JSON messages exchanged over ticket and session sockets
//!
//! Every structured frame is an envelope `{"name": ..., "payload": ...}`.

use crate::types::{MatchId, SessionId, Team, TicketId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Plain-text keepalive a client may send outside the JSON envelope
pub const PLAIN_PING: &str = "ping";
/// Reply to [`PLAIN_PING`]
pub const PLAIN_PONG: &str = "pong";

/// Messages the broker sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum ServerMessage {
    StatusUpdate(StatusUpdate),
    Play(Play),
    Registered {},
    AssignMatch(AssignMatch),
    BackfillMatch(BackfillMatch),
}

/// Progress of a ticket through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum StatusUpdate {
    Connecting,
    #[serde(rename_all = "camelCase")]
    Waiting {
        total_players: u32,
        connected_players: u32,
    },
    #[serde(rename_all = "camelCase")]
    Queued {
        ticket_id: TicketId,
        queued_players: usize,
        estimated_wait_sec: u64,
        status: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    SessionAssignment { match_id: MatchId },
}

/// Tells a ticket its session is joinable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub match_id: MatchId,
    pub session_id: SessionId,
    pub join_delay_sec: u64,
}

/// Match assignment sent to a dedicated server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignMatch {
    pub spectators: Vec<String>,
    pub teams: Vec<Team>,
    pub bucket_id: String,
    pub match_id: MatchId,
    pub match_options: String,
    #[serde(rename = "matchOptionsV2")]
    pub match_options_v2: Map<String, Value>,
}

/// Team update for a match already in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillMatch {
    pub teams: Vec<Team>,
    pub backfill_id: String,
    pub backfill_options: Map<String, Value>,
}

impl ServerMessage {
    pub fn connecting() -> Self {
        ServerMessage::StatusUpdate(StatusUpdate::Connecting)
    }

    pub fn waiting() -> Self {
        ServerMessage::StatusUpdate(StatusUpdate::Waiting {
            total_players: 1,
            connected_players: 1,
        })
    }

    pub fn queued(ticket_id: impl Into<String>, queued_players: usize) -> Self {
        ServerMessage::StatusUpdate(StatusUpdate::Queued {
            ticket_id: ticket_id.into(),
            queued_players,
            estimated_wait_sec: 0,
            status: Map::new(),
        })
    }

    /// Tickets are told the session id in place of a match id
    pub fn session_assignment(session_id: impl Into<String>) -> Self {
        ServerMessage::StatusUpdate(StatusUpdate::SessionAssignment {
            match_id: session_id.into(),
        })
    }

    pub fn play(session_id: impl Into<String>, join_delay_sec: u64) -> Self {
        let session_id = session_id.into();
        ServerMessage::Play(Play {
            match_id: session_id.clone(),
            session_id,
            join_delay_sec,
        })
    }

    pub fn registered() -> Self {
        ServerMessage::Registered {}
    }

    pub fn assign_match(teams: Vec<Team>, bucket_id: String, match_id: impl Into<String>) -> Self {
        ServerMessage::AssignMatch(AssignMatch {
            spectators: Vec::new(),
            teams,
            bucket_id,
            match_id: match_id.into(),
            match_options: String::new(),
            match_options_v2: Map::new(),
        })
    }

    pub fn backfill_match(teams: Vec<Team>, backfill_id: impl Into<String>) -> Self {
        ServerMessage::BackfillMatch(BackfillMatch {
            teams,
            backfill_id: backfill_id.into(),
            backfill_options: Map::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::StatusUpdate(_) => "StatusUpdate",
            ServerMessage::Play(_) => "Play",
            ServerMessage::Registered {} => "Registered",
            ServerMessage::AssignMatch(_) => "AssignMatch",
            ServerMessage::BackfillMatch(_) => "BackfillMatch",
        }
    }
}

/// Envelope of a structured inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Outcome a dedicated server reports for an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignResult {
    Ready,
    Failed,
    Other(String),
}

impl AssignResult {
    pub fn parse(result: &str) -> Self {
        match result {
            "ready" => AssignResult::Ready,
            "failed" => AssignResult::Failed,
            other => AssignResult::Other(other.to_string()),
        }
    }
}

/// Inbound session-socket messages the broker acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInbound {
    AssignMatchResult(AssignResult),
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct AssignMatchResultPayload {
    #[serde(default)]
    result: String,
}

impl SessionInbound {
    /// Parse a text frame received on a session socket
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let envelope: InboundEnvelope = serde_json::from_str(text)?;
        match envelope.name.as_str() {
            "AssignMatchResult" => {
                let payload: AssignMatchResultPayload = serde_json::from_value(envelope.payload)?;
                Ok(SessionInbound::AssignMatchResult(AssignResult::parse(
                    &payload.result,
                )))
            }
            _ => Ok(SessionInbound::Unknown(envelope.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_value(message: &ServerMessage) -> Value {
        serde_json::to_value(message).unwrap()
    }

    #[test]
    fn test_status_update_shapes() {
        assert_eq!(
            to_value(&ServerMessage::connecting()),
            json!({"name": "StatusUpdate", "payload": {"state": "Connecting"}})
        );
        assert_eq!(
            to_value(&ServerMessage::waiting()),
            json!({"name": "StatusUpdate", "payload": {
                "state": "Waiting", "totalPlayers": 1, "connectedPlayers": 1
            }})
        );
        assert_eq!(
            to_value(&ServerMessage::queued("abc", 7)),
            json!({"name": "StatusUpdate", "payload": {
                "state": "Queued", "ticketId": "abc", "queuedPlayers": 7,
                "estimatedWaitSec": 0, "status": {}
            }})
        );
        assert_eq!(
            to_value(&ServerMessage::session_assignment("s1")),
            json!({"name": "StatusUpdate", "payload": {
                "state": "SessionAssignment", "matchId": "s1"
            }})
        );
    }

    #[test]
    fn test_session_messages() {
        assert_eq!(
            to_value(&ServerMessage::registered()),
            json!({"name": "Registered", "payload": {}})
        );
        assert_eq!(
            to_value(&ServerMessage::play("s1", 1)),
            json!({"name": "Play", "payload": {
                "matchId": "s1", "sessionId": "s1", "joinDelaySec": 1
            }})
        );

        let teams = vec![vec![vec!["a".to_string()]], vec![vec!["b".to_string()]]];
        assert_eq!(
            to_value(&ServerMessage::assign_match(teams, "bucket".to_string(), "m1")),
            json!({"name": "AssignMatch", "payload": {
                "spectators": [], "teams": [[["a"]], [["b"]]], "bucketId": "bucket",
                "matchId": "m1", "matchOptions": "", "matchOptionsV2": {}
            }})
        );
        assert_eq!(ServerMessage::backfill_match(vec![], "m1").name(), "BackfillMatch");
    }

    #[test]
    fn test_parse_inbound() {
        let ready = r#"{"name":"AssignMatchResult","payload":{"result":"ready"}}"#;
        assert_eq!(
            SessionInbound::parse(ready).unwrap(),
            SessionInbound::AssignMatchResult(AssignResult::Ready)
        );

        let failed = r#"{"name":"AssignMatchResult","payload":{"result":"failed"}}"#;
        assert_eq!(
            SessionInbound::parse(failed).unwrap(),
            SessionInbound::AssignMatchResult(AssignResult::Failed)
        );

        let other = r#"{"name":"Heartbeat"}"#;
        assert_eq!(
            SessionInbound::parse(other).unwrap(),
            SessionInbound::Unknown("Heartbeat".to_string())
        );

        assert!(SessionInbound::parse("ping").is_err());
    }
}
