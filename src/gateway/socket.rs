//! Plumbing shared by ticket and session sockets
//!
//! A socket is split into a writer task that drains the connection's outbound
//! channel and a read loop owned by the connection task. Both stop when the
//! connection's cancellation token fires.

use crate::registry::{ConnectionHandle, OutboundFrame};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Text frame received from the peer
pub enum Inbound {
    Text(String),
    Closed,
}

/// Forward queued frames to the socket until cancelled or a write fails
pub fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
    write_wait: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Queued frames first, so a Close queued before cancellation is still written
            let frame = tokio::select! {
                biased;
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let (message, last) = match frame {
                OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                OutboundFrame::Ping => (Message::Ping(Bytes::new()), false),
                OutboundFrame::Close => (Message::Close(None), true),
            };

            match tokio::time::timeout(write_wait, sink.send(message)).await {
                Ok(Ok(())) if !last => {}
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    debug!("Socket write failed: {}", e);
                    break;
                }
                Err(_) => {
                    debug!("Socket write timed out after {:?}", write_wait);
                    break;
                }
            }
        }

        cancel.cancel();
        let _ = sink.close().await;
    })
}

/// Read the next text frame.
///
/// Control frames only extend the deadline. Returns `Closed` on a close frame,
/// a read error, cancellation, or when nothing arrived within `pong_wait`.
pub async fn next_text(
    stream: &mut SplitStream<WebSocket>,
    cancel: &CancellationToken,
    pong_wait: Duration,
) -> Inbound {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Inbound::Closed,
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        match next {
            Ok(Some(Ok(Message::Text(text)))) => return Inbound::Text(text.to_string()),
            Ok(Some(Ok(Message::Binary(data)))) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    return Inbound::Text(text);
                }
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {}
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return Inbound::Closed,
            Ok(Some(Err(e))) => {
                debug!("Socket read failed: {}", e);
                return Inbound::Closed;
            }
            Err(_) => {
                debug!("No frame within {:?}, closing", pong_wait);
                return Inbound::Closed;
            }
        }
    }
}

/// Stop every task of a connection and wait for the writer to flush
pub async fn shutdown(connection: &ConnectionHandle, writer: JoinHandle<()>) {
    connection.close();
    let _ = writer.await;
}
