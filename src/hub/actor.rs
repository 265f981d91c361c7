//! Broadcast hub task
//!
//! The hub is the only owner of the viewer registry and of every viewer's
//! lock and sequence state. It handles one event at a time, so none of that
//! state needs a lock.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::config::HubConfig;
use super::handle::{ControlEvent, FrameSender, Handoff, HubHandle, Registration};
use crate::media::{classify, CodedFrame, InitSegmentCache, StreamConfig};
use crate::session::{ClientId, ClientSession, Delivery};
use crate::stats::HubStats;

/// Why a viewer left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveReason {
    /// Viewer's connection asked to leave
    Unregistered,
    /// Outbound queue was full
    Overflow,
    /// Outbound queue receiver was dropped
    Disconnected,
}

/// Broadcast hub: turns each coded frame into per-viewer media segments
pub struct Hub {
    /// Stream parameters for the initialization segment
    stream: StreamConfig,

    /// Initialization segment shared by every viewer
    init_cache: InitSegmentCache,

    /// Registered viewers
    clients: HashMap<ClientId, ClientSession>,

    /// Register and unregister requests, in issue order
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    frame_rx: mpsc::Receiver<Handoff>,

    stats: HubStats,
    stats_tx: watch::Sender<HubStats>,
}

impl Hub {
    /// Create a hub for one stream configuration.
    ///
    /// Returns the hub (to be driven by [`run`](Self::run)), the handle
    /// for viewer connections, and the capture-side frame sender.
    pub fn new(config: HubConfig, stream: StreamConfig) -> (Self, HubHandle, FrameSender) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (stats_tx, stats_rx) = watch::channel(HubStats::default());

        let hub = Self {
            stream,
            init_cache: InitSegmentCache::new(),
            clients: HashMap::new(),
            control_rx,
            frame_rx,
            stats: HubStats::default(),
            stats_tx,
        };

        let handle = HubHandle {
            control_tx,
            stats_rx,
            next_id: Arc::new(AtomicU64::new(1)),
            // tokio channels need at least one slot
            queue_capacity: config.queue_capacity.max(1),
        };

        (hub, handle, FrameSender { tx: frame_tx })
    }

    /// Process events until the frame source closes.
    ///
    /// On exit every viewer queue is closed, which ends their writers.
    pub async fn run(mut self) {
        tracing::info!(
            width = self.stream.width,
            height = self.stream.height,
            codec = %self.stream.avc.codec_string(),
            profile = self.stream.avc.profile_name(),
            level = %self.stream.avc.level_string(),
            "Hub started"
        );

        // Prime the cache so the first viewer does not pay for it
        self.init_cache.get_or_build(&self.stream);

        loop {
            tokio::select! {
                biased;

                Some(event) = self.control_rx.recv() => match event {
                    ControlEvent::Register(registration) => self.on_register(registration),
                    ControlEvent::Unregister(id) => self.on_unregister(id),
                },
                handoff = self.frame_rx.recv() => match handoff {
                    Some(Handoff { frame, accepted }) => {
                        // Producer may have given up waiting
                        let _ = accepted.send(());
                        self.on_frame(frame);
                    }
                    None => break,
                },
            }
            self.publish_stats();
        }

        self.shutdown();
        self.publish_stats();
    }

    /// Number of registered viewers
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn on_register(&mut self, registration: Registration) {
        let Registration {
            id,
            peer_addr,
            outbound,
        } = registration;

        let mut session = ClientSession::new(id, peer_addr, outbound);
        let init = self.init_cache.get_or_build(&self.stream);

        match session.send_init(init) {
            Delivery::Queued { .. } => {
                self.clients.insert(id, session);
                self.stats.total_clients += 1;

                tracing::info!(
                    client_id = %id,
                    peer = %peer_addr,
                    clients = self.clients.len(),
                    "Viewer registered"
                );
            }
            other => {
                tracing::debug!(
                    client_id = %id,
                    peer = %peer_addr,
                    delivery = ?other,
                    "Viewer left before registration completed"
                );
            }
        }
    }

    pub(crate) fn on_unregister(&mut self, id: ClientId) {
        if !self.remove(id, RemoveReason::Unregistered) {
            tracing::trace!(client_id = %id, "Unregister for unknown viewer");
        }
    }

    pub(crate) fn on_frame(&mut self, frame: CodedFrame) {
        self.stats.frames_received += 1;

        let info = classify(&frame);
        if !info.is_vcl {
            self.stats.non_vcl_discarded += 1;
            tracing::trace!(unit_type = info.unit_type, "Discarded non-VCL frame");
            return;
        }
        if info.is_keyframe {
            self.stats.keyframes += 1;
        }

        let mut removals = Vec::new();

        for (id, session) in self.clients.iter_mut() {
            match session.offer(&frame, &info) {
                Delivery::Queued { sequence } => {
                    self.stats.segments_queued += 1;
                    if sequence == 1 {
                        let waited = session.state().lock_delay().unwrap_or_default();
                        tracing::debug!(
                            client_id = %id,
                            waited_ms = waited.as_millis() as u64,
                            "Viewer synchronized on key frame"
                        );
                    }
                    tracing::trace!(
                        client_id = %id,
                        sequence = sequence,
                        keyframe = info.is_keyframe,
                        size = frame.len(),
                        "Queued media segment"
                    );
                }
                Delivery::Skipped => {}
                Delivery::Overflow => removals.push((*id, RemoveReason::Overflow)),
                Delivery::Disconnected => removals.push((*id, RemoveReason::Disconnected)),
            }
        }

        for (id, reason) in removals {
            self.remove(id, reason);
        }
    }

    /// Remove and close a viewer. Returns false if it was not registered.
    fn remove(&mut self, id: ClientId, reason: RemoveReason) -> bool {
        let Some(mut session) = self.clients.remove(&id) else {
            return false;
        };

        // Dropping the session drops the queue sender, which ends the writer
        session.close();

        match reason {
            RemoveReason::Overflow => {
                self.stats.dropped_clients += 1;
                tracing::warn!(
                    client_id = %id,
                    peer = %session.peer_addr(),
                    sequence = session.state().next_sequence(),
                    clients = self.clients.len(),
                    "Viewer queue full, dropping viewer"
                );
            }
            RemoveReason::Unregistered | RemoveReason::Disconnected => {
                tracing::info!(
                    client_id = %id,
                    peer = %session.peer_addr(),
                    segments = session.state().stats.segments_queued,
                    connected_secs = session.state().duration().as_secs(),
                    bitrate = session.state().stats.bitrate(session.state().duration()),
                    reason = ?reason,
                    clients = self.clients.len(),
                    "Viewer unregistered"
                );
            }
        }

        true
    }

    fn shutdown(&mut self) {
        tracing::info!(
            clients = self.clients.len(),
            "Frame source closed, disconnecting viewers"
        );

        for session in self.clients.values_mut() {
            session.close();
        }
        self.clients.clear();
    }

    fn publish_stats(&mut self) {
        self.stats.active_clients = self.clients.len() as u64;
        self.stats_tx.send_replace(self.stats.clone());
    }
}
