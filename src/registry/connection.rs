//! Outbound side of a socket connection
//!
//! A handle owns the sending half of the channel that feeds the connection's
//! writer task, plus the cancellation token shared by every task scoped to
//! that connection. Handles are cheap to clone and never block: sends that
//! cannot be queued immediately fail instead of waiting on network I/O.

use crate::error::{MatchmakingError, Result};
use crate::utils::generate_connection_id;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Frame queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

/// Cloneable handle to a live socket connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    sender: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: generate_connection_id(),
            sender,
            cancel: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token cancelled when the connection goes away
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Queue a raw text frame
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_frame(OutboundFrame::Text(text.into()))
    }

    /// Serialize and queue a JSON message
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message).map_err(|e| MatchmakingError::SendFailed {
            connection_id: self.id.clone(),
            reason: format!("serialization failed: {}", e),
        })?;
        self.send_text(text)
    }

    /// Queue a protocol-level ping
    pub fn ping(&self) -> Result<()> {
        self.send_frame(OutboundFrame::Ping)
    }

    /// Cancel every task scoped to this connection and ask the writer to close
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!("Closing connection - id: '{}'", self.id);
        // Best effort: the writer also stops on cancellation.
        let _ = self.sender.try_send(OutboundFrame::Close);
        self.cancel.cancel();
    }

    fn send_frame(&self, frame: OutboundFrame) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MatchmakingError::ConnectionClosed {
                connection_id: self.id.clone(),
            }
            .into());
        }

        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(MatchmakingError::SendFailed {
                connection_id: self.id.clone(),
                reason: "outbound buffer full".to_string(),
            }
            .into()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.cancel.cancel();
                Err(MatchmakingError::ConnectionClosed {
                    connection_id: self.id.clone(),
                }
                .into())
            }
        }
    }
}
