//! Statistics for viewers and the broadcast hub

use std::time::Duration;

/// Per-viewer delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Media segments queued for the viewer
    pub segments_queued: u64,
    /// Bytes of media segments queued
    pub bytes_queued: u64,
    /// Pictures skipped while waiting for the first key frame
    pub frames_skipped: u64,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Average bitrate over `duration`, in bits per second
    pub fn bitrate(&self, duration: Duration) -> u64 {
        let secs = duration.as_secs();
        if secs > 0 {
            (self.bytes_queued * 8) / secs
        } else {
            0
        }
    }
}

/// Hub-wide counters, published after every hub event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered viewers
    pub active_clients: u64,
    /// Viewers registered since startup
    pub total_clients: u64,
    /// Viewers dropped because their queue was full
    pub dropped_clients: u64,
    /// Frames received from the capture source
    pub frames_received: u64,
    /// Key frames received
    pub keyframes: u64,
    /// Non-VCL frames discarded
    pub non_vcl_discarded: u64,
    /// Media segments queued across all viewers
    pub segments_queued: u64,
}

impl HubStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.segments_queued, 0);
        assert_eq!(stats.bytes_queued, 0);
        assert_eq!(stats.frames_skipped, 0);
    }

    #[test]
    fn test_session_stats_bitrate() {
        let mut stats = SessionStats::new();
        stats.bytes_queued = 1_000_000;

        // 1,000,000 bytes * 8 bits / 10 seconds = 800,000 bps
        assert_eq!(stats.bitrate(Duration::from_secs(10)), 800_000);
    }

    #[test]
    fn test_session_stats_bitrate_zero_duration() {
        let mut stats = SessionStats::new();
        stats.bytes_queued = 1_000_000;

        assert_eq!(stats.bitrate(Duration::ZERO), 0);
    }

    #[test]
    fn test_hub_stats_new() {
        let stats = HubStats::new();
        assert_eq!(stats, HubStats::default());
        assert_eq!(stats.active_clients, 0);
        assert_eq!(stats.dropped_clients, 0);
    }
}
