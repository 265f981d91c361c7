//! Viewer admission state machine
//!
//! A viewer that joins mid-stream cannot decode anything before the next
//! IDR picture, and once decoding has started no picture may be skipped.
//!
//! ```text
//!             first key frame              disconnect / overflow / error
//! Unlocked ─────────────────────► Locked ───────────────────────────────► Closed
//!    │                                                                      ▲
//!    └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The locked flag only ever moves forward.

use std::time::Instant;

use crate::media::FrameInfo;
use crate::stats::SessionStats;

/// Admission phase of one viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the first key frame
    Unlocked,
    /// Synchronized; every picture is forwarded
    Locked,
    /// Terminal
    Closed,
}

/// Outcome of offering one frame to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward the frame as sample `sequence`
    Forward { sequence: u32, is_keyframe: bool },
    /// Non-VCL frame, never forwarded
    NotVcl,
    /// Picture before the first key frame
    AwaitingKeyframe,
    /// Session already closed
    Closed,
}

/// Per-viewer admission and sequencing state
#[derive(Debug)]
pub struct SessionState {
    /// Current phase
    phase: SessionPhase,

    /// Sample number of the next forwarded frame (starts at 1)
    next_sequence: u32,

    /// When the viewer connected
    pub connected_at: Instant,

    /// When the first key frame was forwarded
    pub locked_at: Option<Instant>,

    /// Delivery counters
    pub stats: SessionStats,
}

impl SessionState {
    /// Create a new session state
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Unlocked,
            next_sequence: 1,
            connected_at: Instant::now(),
            locked_at: None,
            stats: SessionStats::default(),
        }
    }

    /// Decide whether a frame is forwarded to this viewer.
    ///
    /// A key frame seen while unlocked locks the session. The sequence
    /// number is only consumed by [`commit`](Self::commit), once the
    /// segment has actually been queued.
    pub fn admit(&mut self, info: &FrameInfo) -> Admission {
        if !info.is_vcl {
            return Admission::NotVcl;
        }

        match self.phase {
            SessionPhase::Closed => Admission::Closed,
            SessionPhase::Unlocked if !info.is_keyframe => {
                self.stats.frames_skipped += 1;
                Admission::AwaitingKeyframe
            }
            SessionPhase::Unlocked => {
                self.phase = SessionPhase::Locked;
                self.locked_at = Some(Instant::now());
                self.forward(info)
            }
            SessionPhase::Locked => self.forward(info),
        }
    }

    fn forward(&self, info: &FrameInfo) -> Admission {
        Admission::Forward {
            sequence: self.next_sequence,
            is_keyframe: info.is_keyframe,
        }
    }

    /// Record that the admitted segment of `len` bytes was queued
    pub fn commit(&mut self, len: usize) {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.stats.segments_queued += 1;
        self.stats.bytes_queued += len as u64;
    }

    /// Move to the terminal phase
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_locked(&self) -> bool {
        self.phase == SessionPhase::Locked
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Time spent connected
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Time from connecting until the first key frame was forwarded
    pub fn lock_delay(&self) -> Option<std::time::Duration> {
        self.locked_at.map(|at| at.duration_since(self.connected_at))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
