//! Frame storage for the capture context
//!
//! Frames are carved out of large preallocated slabs with `BytesMut::split`,
//! which only bumps a reference count once a slab is shared. The broadcast
//! side keeps spare slabs ready and releases storage the capture context has
//! retired, so in the steady state the capture context neither allocates
//! nor frees.
//!
//! ```text
//!   capture context                         broadcast task
//!   ───────────────                         ──────────────
//!   take() ◄──── [ spare slabs ] ◄───────── replenish(): allocate
//!   retire() ──► [ retired storage ] ─────► replenish(): drop
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crossbeam_queue::ArrayQueue;

use crate::stats::BridgeCounters;

/// Default slab size in bytes
pub const SLAB_BYTES: usize = 64 * 1024;

/// Slabs kept ready for the capture context
pub const SPARE_SLABS: usize = 2;

/// Retired storage awaiting release
const RETIRED_CAPACITY: usize = 64;

/// Slab pool shared by the producer and the broadcast task
pub struct FramePool {
    slab_bytes: usize,
    spare: ArrayQueue<BytesMut>,
    retired: ArrayQueue<Bytes>,
    counters: Arc<BridgeCounters>,
}

impl FramePool {
    /// Create a pool and preallocate its spare slabs
    pub fn new(slab_bytes: usize, spare_slabs: usize, counters: Arc<BridgeCounters>) -> Self {
        let pool = Self {
            slab_bytes: slab_bytes.max(1),
            spare: ArrayQueue::new(spare_slabs.max(1)),
            retired: ArrayQueue::new(RETIRED_CAPACITY),
            counters,
        };
        pool.replenish();
        pool
    }

    pub fn slab_bytes(&self) -> usize {
        self.slab_bytes
    }

    /// Spare slabs currently available
    pub fn spare(&self) -> usize {
        self.spare.len()
    }

    /// Take storage for at least `bytes`. Capture context only.
    ///
    /// Falls back to allocating when no spare fits; the fallback is counted.
    pub fn take(&self, bytes: usize) -> BytesMut {
        if bytes <= self.slab_bytes {
            if let Some(slab) = self.spare.pop() {
                return slab;
            }
        }

        self.counters.on_capture_allocation();
        BytesMut::with_capacity(bytes.max(self.slab_bytes))
    }

    /// Hand storage to the broadcast side for release. Capture context only.
    pub fn retire(&self, storage: Bytes) {
        // Full: the storage is released here instead
        let _ = self.retired.push(storage);
    }

    /// Release retired storage and top up spare slabs. Broadcast context only.
    pub fn replenish(&self) {
        while self.retired.pop().is_some() {}

        while !self.spare.is_full() {
            if self.spare.push(BytesMut::with_capacity(self.slab_bytes)).is_err() {
                break;
            }
        }
    }
}
