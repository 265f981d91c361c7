//! Hub configuration

/// Broadcast hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound segments buffered per viewer before it is dropped.
    /// One slot is taken by the initialization segment. Values below 1
    /// are treated as 1.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 30, // about one second at 30 fps
        }
    }
}

impl HubConfig {
    /// Set the per-viewer queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
