//! Error types for the matchmaking broker
//!
//! Engine code returns `anyhow::Result`; the typed variants below are what
//! callers downcast to when they need to decide how to react to a failure.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Failure classes raised by the engine, the gateway and the record store
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Authentication failed: {reason}")]
    AuthFailure { reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session record not found: {session_id}")]
    RecordNotFound { session_id: String },

    #[error("Ticket not found: {ticket_id}")]
    TicketNotFound { ticket_id: String },

    #[error("Invalid attributes for session {session_id}: {reason}")]
    InvalidAttributes { session_id: String, reason: String },

    #[error("Failed to send to connection {connection_id}: {reason}")]
    SendFailed {
        connection_id: String,
        reason: String,
    },

    #[error("Connection closed: {connection_id}")]
    ConnectionClosed { connection_id: String },

    #[error("Record store error: {message}")]
    StorageError { message: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Error for a poisoned lock guarding the named resource
    pub fn lock_failed(resource: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", resource),
        }
    }

    /// Whether this failure only concerns a single connection
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MatchmakingError::SendFailed { .. } | MatchmakingError::ConnectionClosed { .. }
        )
    }

    /// Whether this failure means a lookup came back empty
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MatchmakingError::SessionNotFound { .. }
                | MatchmakingError::RecordNotFound { .. }
                | MatchmakingError::TicketNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = MatchmakingError::SendFailed {
            connection_id: "c1".to_string(),
            reason: "channel full".to_string(),
        };
        assert!(err.is_transient());
        assert!(!err.is_not_found());

        let err = MatchmakingError::RecordNotFound {
            session_id: "s1".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Session record not found: s1");
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = MatchmakingError::lock_failed("tickets").into();
        match err.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::InternalError { message }) => {
                assert_eq!(message, "Failed to acquire tickets lock")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
