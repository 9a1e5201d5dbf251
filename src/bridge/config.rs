//! Bridge configuration

use std::time::Duration;

/// Capture-to-broadcast bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Frames the handoff buffers between capture and broadcast
    pub handoff_capacity: usize,

    /// Grace period for in-flight writes when stopping
    pub drain_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handoff_capacity: 4,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl BridgeConfig {
    /// Set handoff capacity (minimum 1)
    pub fn handoff_capacity(mut self, frames: usize) -> Self {
        self.handoff_capacity = frames.max(1);
        self
    }

    /// Set drain timeout
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
