//! Statistics for the bridge and its subscribers
//!
//! Counters are plain atomics so the capture context can bump them without
//! taking a lock. Snapshots are cheap `Clone` values for status displays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Live bridge-wide counters
#[derive(Debug)]
pub struct BridgeCounters {
    started_at: Instant,
    frames_captured: AtomicU64,
    handoff_overflows: AtomicU64,
    capture_allocations: AtomicU64,
    frames_broadcast: AtomicU64,
    frames_unheard: AtomicU64,
    subscribers_total: AtomicU64,
}

impl BridgeCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_captured: AtomicU64::new(0),
            handoff_overflows: AtomicU64::new(0),
            capture_allocations: AtomicU64::new(0),
            frames_broadcast: AtomicU64::new(0),
            frames_unheard: AtomicU64::new(0),
            subscribers_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn on_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the overflow total including this one
    pub(crate) fn on_handoff_overflow(&self) -> u64 {
        self.handoff_overflows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn handoff_overflows(&self) -> u64 {
        self.handoff_overflows.load(Ordering::Relaxed)
    }

    pub(crate) fn on_capture_allocation(&self) {
        self.capture_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_broadcast(&self) {
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_unheard(&self) {
        self.frames_unheard.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_subscriber(&self) {
        self.subscribers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            uptime: self.started_at.elapsed(),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            handoff_overflows: self.handoff_overflows.load(Ordering::Relaxed),
            capture_allocations: self.capture_allocations.load(Ordering::Relaxed),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            frames_unheard: self.frames_unheard.load(Ordering::Relaxed),
            subscribers_total: self.subscribers_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for BridgeCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge-wide statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStats {
    /// Time since the capture session started
    pub uptime: Duration,
    /// Frames pushed by the capture context
    pub frames_captured: u64,
    /// Frames dropped because the handoff was full
    pub handoff_overflows: u64,
    /// Frame buffers the capture context had to allocate itself
    pub capture_allocations: u64,
    /// Frames fanned out to at least one subscriber
    pub frames_broadcast: u64,
    /// Frames discarded because nobody was subscribed
    pub frames_unheard: u64,
    /// Subscribers accepted during this session
    pub subscribers_total: u64,
}

impl BridgeStats {
    /// Capture rate in frames per second
    pub fn capture_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_captured as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live per-subscriber counters
#[derive(Debug, Default)]
pub struct SubscriberCounters {
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SubscriberCounters {
    pub(crate) fn on_delivered(&self, bytes: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Returns the drop total including this one
    pub(crate) fn on_dropped(&self) -> u64 {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> SubscriberStats {
        SubscriberStats {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Per-subscriber statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Frames fully written to the transport
    pub frames_delivered: u64,
    /// Frames lost to the drop-oldest policy
    pub frames_dropped: u64,
    /// Payload bytes written
    pub bytes_sent: u64,
}
