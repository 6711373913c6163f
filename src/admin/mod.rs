//! Administrative API over persisted session records

pub mod operations;

pub use operations::{
    CreateSessionRequest, HeartbeatRequest, PlaylistResponse, SessionAdmin,
    SessionAttributesBody, SessionView,
};
