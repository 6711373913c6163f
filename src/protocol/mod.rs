//! Wire messages of the ticket and session sockets

pub mod messages;

pub use messages::{
    AssignMatch, AssignResult, BackfillMatch, InboundEnvelope, Play, ServerMessage,
    SessionInbound, StatusUpdate, PLAIN_PING, PLAIN_PONG,
};
