//! Handles for talking to the hub task
//!
//! The hub is reached only through messages. [`HubHandle`] is cloned into
//! every viewer connection; [`FrameSender`] belongs to the capture source.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use super::error::HubError;
use crate::media::CodedFrame;
use crate::session::{ClientId, ClientLink};
use crate::stats::HubStats;

/// Register request carried to the hub
#[derive(Debug)]
pub(crate) struct Registration {
    pub id: ClientId,
    pub peer_addr: SocketAddr,
    pub outbound: mpsc::Sender<Bytes>,
}

/// Registry changes, delivered in the order callers issued them
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Register(Registration),
    Unregister(ClientId),
}

/// A frame on its way to the hub, with the hub's acceptance signal
#[derive(Debug)]
pub(crate) struct Handoff {
    pub frame: CodedFrame,
    pub accepted: oneshot::Sender<()>,
}

/// Cloneable handle used by viewer connections
#[derive(Debug, Clone)]
pub struct HubHandle {
    pub(crate) control_tx: mpsc::UnboundedSender<ControlEvent>,
    pub(crate) stats_rx: watch::Receiver<HubStats>,
    pub(crate) next_id: Arc<AtomicU64>,
    pub(crate) queue_capacity: usize,
}

impl HubHandle {
    /// Register a new viewer.
    ///
    /// The returned link yields the initialization segment first, then one
    /// media segment per forwarded frame. It drains to `None` once the hub
    /// drops the viewer. A later [`unregister`](Self::unregister) for the
    /// same id is always handled after this registration.
    pub fn register(&self, peer_addr: SocketAddr) -> Result<ClientLink, HubError> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, segments) = mpsc::channel(self.queue_capacity);

        self.control_tx
            .send(ControlEvent::Register(Registration {
                id,
                peer_addr,
                outbound,
            }))
            .map_err(|_| HubError::Closed)?;

        Ok(ClientLink { id, segments })
    }

    /// Ask the hub to remove a viewer. Safe to call more than once.
    pub fn unregister(&self, id: ClientId) {
        // Hub gone means the session is gone too
        let _ = self.control_tx.send(ControlEvent::Unregister(id));
    }

    /// Latest published hub statistics
    pub fn stats(&self) -> HubStats {
        self.stats_rx.borrow().clone()
    }

    /// Subscribe to statistics updates
    pub fn watch_stats(&self) -> watch::Receiver<HubStats> {
        self.stats_rx.clone()
    }

    /// Whether the hub task is still accepting events
    pub fn is_running(&self) -> bool {
        !self.control_tx.is_closed()
    }
}

/// Capture-side handoff of coded frames to the hub.
///
/// Each send completes only once the hub has taken the frame, so a busy
/// hub slows the producer and no frames wait in between.
#[derive(Debug)]
pub struct FrameSender {
    pub(crate) tx: mpsc::Sender<Handoff>,
}

impl FrameSender {
    /// Hand one frame to the hub, waiting until the hub accepts it
    pub async fn send(&self, frame: CodedFrame) -> Result<(), HubError> {
        let (accepted, ack) = oneshot::channel();
        self.tx
            .send(Handoff { frame, accepted })
            .await
            .map_err(|_| HubError::Closed)?;
        ack.await.map_err(|_| HubError::Closed)
    }
}
