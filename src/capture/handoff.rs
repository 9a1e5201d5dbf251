//! Capture-to-broadcast handoff
//!
//! A bounded single-producer/single-consumer ring between the real-time
//! capture callback and the broadcast task.
//!
//! ```text
//!   capture callback                       broadcast task
//!   ───────────────                        ──────────────
//!   push(frame) ──► [ f3 | f4 | f5 | f6 ] ──► recv().await
//!                     ▲
//!                     └─ full: f2 evicted (drop-oldest)
//! ```
//!
//! The producer side never blocks, never locks and never allocates: the ring
//! is preallocated, frame storage comes from a [`FramePool`] and wakeups go
//! through an `AtomicWaker`. When the ring is full the oldest buffered frame
//! is evicted, since stale audio has no value; its storage is retired to the
//! pool so the broadcast side releases it.

use std::future::poll_fn;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use crossbeam_queue::ArrayQueue;
use futures_util::task::AtomicWaker;

use crate::error::DeviceError;
use crate::registry::frame::Frame;
use crate::stats::BridgeCounters;

use super::pool::{FramePool, SLAB_BYTES, SPARE_SLABS};

/// Why the handoff stopped yielding frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffClosed {
    /// Orderly stop requested by the control surface
    Stopped,
    /// Capture source failed
    Device(DeviceError),
}

impl std::fmt::Display for HandoffClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffClosed::Stopped => write!(f, "Handoff stopped"),
            HandoffClosed::Device(e) => write!(f, "Handoff closed by device error: {}", e),
        }
    }
}

/// Result of a producer push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame buffered
    Queued,
    /// Frame buffered after evicting the oldest one
    Displaced,
    /// Handoff closed, frame discarded
    Closed,
}

/// Bounded drop-oldest relay from capture context to broadcast context
pub struct HandoffChannel {
    ring: ArrayQueue<Frame>,
    waker: AtomicWaker,
    closed: OnceLock<HandoffClosed>,
    pool: FramePool,
    counters: Arc<BridgeCounters>,
}

impl HandoffChannel {
    /// Create a handoff holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize, counters: Arc<BridgeCounters>) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
            waker: AtomicWaker::new(),
            closed: OnceLock::new(),
            pool: FramePool::new(SLAB_BYTES, SPARE_SLABS, counters.clone()),
            counters,
        }
    }

    /// Buffer a frame. Capture context only.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        if self.closed.get().is_some() {
            self.pool.retire(frame.data);
            return PushOutcome::Closed;
        }

        self.counters.on_captured();
        let outcome = match self.ring.force_push(frame) {
            None => PushOutcome::Queued,
            Some(evicted) => {
                self.counters.on_handoff_overflow();
                self.pool.retire(evicted.data);
                PushOutcome::Displaced
            }
        };

        self.waker.wake();
        outcome
    }

    /// Storage pool for the producer
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Take the oldest buffered frame without waiting
    pub fn try_pop(&self) -> Option<Frame> {
        if self.closed.get().is_some() {
            return None;
        }
        self.ring.pop()
    }

    /// Wait for the next frame
    ///
    /// Once the handoff is closed, buffered frames are abandoned and every
    /// call returns the close reason.
    pub async fn recv(&self) -> Result<Frame, HandoffClosed> {
        poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Poll for the next frame. Broadcast context only.
    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<Frame, HandoffClosed>> {
        if let Some(ready) = self.ready() {
            return Poll::Ready(ready);
        }

        self.waker.register(cx.waker());

        // A push or close may have raced the registration
        match self.ready() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }

    fn ready(&self) -> Option<Result<Frame, HandoffClosed>> {
        if let Some(reason) = self.closed.get() {
            return Some(Err(reason.clone()));
        }
        self.ring.pop().map(Ok)
    }

    /// Stop yielding frames
    pub fn close(&self) {
        if self.closed.set(HandoffClosed::Stopped).is_ok() {
            self.waker.wake();
        }
    }

    /// Stop yielding frames because the device failed
    ///
    /// The first close reason wins; a failure after `close` is ignored.
    pub fn fail(&self, err: DeviceError) {
        if self.closed.set(HandoffClosed::Device(err)).is_ok() {
            self.waker.wake();
        }
    }

    /// Close reason, if closed
    pub fn closed_reason(&self) -> Option<&HandoffClosed> {
        self.closed.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    /// Maximum number of buffered frames
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn handoff(capacity: usize) -> (Arc<HandoffChannel>, Arc<BridgeCounters>) {
        let counters = Arc::new(BridgeCounters::new());
        (
            Arc::new(HandoffChannel::new(capacity, counters.clone())),
            counters,
        )
    }

    fn frame(seq: u64) -> Frame {
        Frame::from_samples(seq, &[seq as f32])
    }

    #[test]
    fn test_fifo_order() {
        let (handoff, _) = handoff(4);

        assert_eq!(handoff.push(frame(0)), PushOutcome::Queued);
        assert_eq!(handoff.push(frame(1)), PushOutcome::Queued);

        assert_eq!(handoff.try_pop().unwrap().sequence, 0);
        assert_eq!(handoff.try_pop().unwrap().sequence, 1);
        assert!(handoff.try_pop().is_none());
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let (handoff, counters) = handoff(2);

        handoff.push(frame(0));
        handoff.push(frame(1));
        assert_eq!(handoff.push(frame(2)), PushOutcome::Displaced);
        assert_eq!(handoff.push(frame(3)), PushOutcome::Displaced);

        // Only the two most recent survive
        assert_eq!(handoff.len(), 2);
        assert_eq!(handoff.try_pop().unwrap().sequence, 2);
        assert_eq!(handoff.try_pop().unwrap().sequence, 3);

        let stats = counters.snapshot();
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.handoff_overflows, 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (handoff, _) = handoff(0);
        assert_eq!(handoff.capacity(), 1);
    }

    #[test]
    fn test_recv_pending_until_push() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (handoff, _) = handoff(4);
        let mut recv = task::spawn(handoff.recv());

        assert_pending!(recv.poll());
        handoff.push(frame(7));
        assert!(recv.is_woken());

        let received = assert_ready!(recv.poll()).unwrap();
        assert_eq!(received.sequence, 7);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_thread() {
        let (handoff, _) = handoff(4);

        let producer = handoff.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(frame(42));
        });

        let received = tokio::time::timeout(Duration::from_secs(2), handoff.recv())
            .await
            .expect("recv timed out")
            .unwrap();
        assert_eq!(received.sequence, 42);

        thread.join().unwrap();
    }

    #[tokio::test]
    async fn test_close_abandons_buffered_frames() {
        let (handoff, _) = handoff(4);

        handoff.push(frame(0));
        handoff.close();

        assert_eq!(handoff.recv().await, Err(HandoffClosed::Stopped));
        assert_eq!(handoff.push(frame(1)), PushOutcome::Closed);
        assert!(handoff.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_fail_wakes_waiting_consumer() {
        let (handoff, _) = handoff(4);

        let waiter = {
            let handoff = handoff.clone();
            tokio::spawn(async move { handoff.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handoff.fail(DeviceError::Disconnected);

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(HandoffClosed::Device(DeviceError::Disconnected)));
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (handoff, _) = handoff(1);

        handoff.close();
        handoff.fail(DeviceError::Disconnected);

        assert_eq!(handoff.closed_reason(), Some(&HandoffClosed::Stopped));
    }
}
