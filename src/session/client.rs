//! Viewer sessions
//!
//! The hub owns every [`ClientSession`] and is the only code that changes
//! its state. The viewer's connection task holds the matching
//! [`ClientLink`]: the receiving end of the bounded outbound queue. When
//! the hub drops a session, the queue closes and the link drains to `None`.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::state::{Admission, SessionState};
use crate::media::{build_media_segment, CodedFrame, FrameInfo};

/// Unique viewer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of offering a frame or segment to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Segment queued as sample `sequence` (0 for the init segment)
    Queued { sequence: u32 },
    /// Nothing to send for this viewer
    Skipped,
    /// Queue full: the viewer is lagging
    Overflow,
    /// The viewer's receiving side is gone
    Disconnected,
}

/// Hub-side state of one connected viewer
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    peer_addr: SocketAddr,
    state: SessionState,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientSession {
    pub fn new(id: ClientId, peer_addr: SocketAddr, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            peer_addr,
            state: SessionState::new(),
            outbound,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Queue the initialization segment
    pub fn send_init(&mut self, segment: Bytes) -> Delivery {
        match self.outbound.try_send(segment) {
            Ok(()) => Delivery::Queued { sequence: 0 },
            Err(TrySendError::Full(_)) => Delivery::Overflow,
            Err(TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }

    /// Run one frame through admission and, if admitted, queue its
    /// media segment without waiting.
    pub fn offer(&mut self, frame: &CodedFrame, info: &FrameInfo) -> Delivery {
        let (sequence, is_keyframe) = match self.state.admit(info) {
            Admission::Forward {
                sequence,
                is_keyframe,
            } => (sequence, is_keyframe),
            Admission::NotVcl | Admission::AwaitingKeyframe => return Delivery::Skipped,
            Admission::Closed => return Delivery::Disconnected,
        };

        let segment = build_media_segment(sequence, frame, is_keyframe);
        let len = segment.len();

        match self.outbound.try_send(segment) {
            Ok(()) => {
                self.state.commit(len);
                Delivery::Queued { sequence }
            }
            Err(TrySendError::Full(_)) => Delivery::Overflow,
            Err(TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }

    /// Close the session. Dropping it afterwards closes the outbound queue.
    pub fn close(&mut self) {
        self.state.close();
    }
}

/// Viewer-side end of a session
#[derive(Debug)]
pub struct ClientLink {
    /// Identifier to pass back when unregistering
    pub id: ClientId,
    /// Segments to write to the transport, in order
    pub segments: mpsc::Receiver<Bytes>,
}
