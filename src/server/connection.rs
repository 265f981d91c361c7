//! Per-viewer WebSocket connection
//!
//! Each viewer runs two halves concurrently: a writer that drains the
//! session queue into the socket, and a reader that only watches for the
//! peer going away. Whichever finishes first ends the connection.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::hub::HubHandle;

/// How a viewer connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// The hub closed the session queue
    QueueClosed,
    /// The peer closed the socket
    PeerClosed,
}

/// Serve one upgraded viewer socket until either side goes away
pub async fn serve_viewer(
    mut socket: WebSocket,
    peer_addr: SocketAddr,
    hub: HubHandle,
    write_timeout: Duration,
) {
    let mut link = match hub.register(peer_addr) {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(peer = %peer_addr, error = %e, "Viewer refused");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let client_id = link.id;

    tracing::debug!(client_id = %client_id, peer = %peer_addr, "Viewer connected");

    let (mut sink, mut stream) = socket.split();

    let result = tokio::select! {
        r = pump_segments(&mut link.segments, &mut sink, write_timeout) => {
            r.map(|()| Ended::QueueClosed)
        }
        r = watch_peer(&mut stream) => r.map(|()| Ended::PeerClosed),
    };

    hub.unregister(client_id);

    match result {
        Ok(Ended::QueueClosed) => {
            let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(None))).await;
            tracing::debug!(client_id = %client_id, "Session closed by hub");
        }
        Ok(Ended::PeerClosed) => {
            tracing::debug!(client_id = %client_id, "Viewer disconnected");
        }
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                peer = %peer_addr,
                error = %e,
                "Viewer connection failed"
            );
        }
    }
}

/// Write queued segments to `sink`, one binary message per segment.
///
/// Returns `Ok` once the queue is closed and drained. A write that fails or
/// takes longer than `write_timeout` ends the pump with a transport error.
pub async fn pump_segments<S>(
    segments: &mut mpsc::Receiver<Bytes>,
    sink: &mut S,
    write_timeout: Duration,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(segment) = segments.recv().await {
        let len = segment.len();
        match tokio::time::timeout(write_timeout, sink.send(Message::Binary(segment.to_vec())))
            .await
        {
            Ok(Ok(())) => tracing::trace!(size = len, "Wrote segment"),
            Ok(Err(e)) => return Err(Error::Transport(format!("write failed: {}", e))),
            Err(_) => {
                return Err(Error::Transport(format!(
                    "write timed out after {:?}",
                    write_timeout
                )))
            }
        }
    }
    Ok(())
}

/// Read from the peer until it closes. Inbound data is ignored.
async fn watch_peer<S, E>(stream: &mut S) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(Error::Transport(format!("read failed: {}", e))),
        }
    }
    Ok(())
}
