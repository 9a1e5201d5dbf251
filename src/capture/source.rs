//! Capture source abstraction
//!
//! A [`CaptureSource`] is opened with the session parameters and a
//! [`FrameProducer`]. From then on it calls the producer from its own
//! timing-critical context once per hardware interval. Fatal failures are
//! reported through a [`DeviceFailure`] handle, which is safe to use from any
//! thread (typically the backend's error callback).

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::error::DeviceError;
use crate::registry::frame::{Frame, SessionParams, SAMPLE_BYTES};

use super::handoff::{HandoffChannel, PushOutcome};

/// A device that produces audio frames
pub trait CaptureSource: Send + 'static {
    /// Start delivering frames to `producer`
    ///
    /// Must return once capture is running; frames are delivered from the
    /// source's own execution context, never from the caller's.
    fn open(&mut self, params: SessionParams, producer: FrameProducer) -> Result<(), DeviceError>;

    /// Stop delivering frames
    ///
    /// Cooperative and best-effort. Must be a no-op when not open.
    fn close(&mut self);
}

/// Capture-side handle to the handoff
///
/// Owned by exactly one capture context. Every call is non-blocking, and
/// `push_samples` serializes into pooled storage instead of allocating.
pub struct FrameProducer {
    handoff: Arc<HandoffChannel>,
    storage: BytesMut,
    next_sequence: u64,
}

impl FrameProducer {
    pub(crate) fn new(handoff: Arc<HandoffChannel>) -> Self {
        Self {
            handoff,
            storage: BytesMut::new(),
            next_sequence: 0,
        }
    }

    /// Serialize interleaved samples into a frame and hand it off
    pub fn push_samples(&mut self, samples: &[f32]) -> PushOutcome {
        let bytes = samples.len() * SAMPLE_BYTES;
        if self.storage.capacity() < bytes {
            let slab = self.handoff.pool().take(bytes);
            let exhausted = std::mem::replace(&mut self.storage, slab);
            self.handoff.pool().retire(exhausted.freeze());
        }

        for &sample in samples {
            self.storage.put_f32_le(sample);
        }

        let frame = Frame::new(self.next_sequence, self.storage.split().freeze());
        self.next_sequence += 1;
        self.handoff.push(frame)
    }

    /// Hand off an already-built frame
    pub fn push(&mut self, frame: Frame) -> PushOutcome {
        self.next_sequence = frame.sequence + 1;
        self.handoff.push(frame)
    }

    /// Sequence number the next `push_samples` will use
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Whether the bridge stopped listening
    pub fn is_closed(&self) -> bool {
        self.handoff.is_closed()
    }

    /// Report a fatal error, ending the session
    pub fn fail(&self, err: DeviceError) {
        self.handoff.fail(err);
    }

    /// Handle for reporting fatal errors from another thread
    pub fn failure_handle(&self) -> DeviceFailure {
        DeviceFailure {
            handoff: self.handoff.clone(),
        }
    }
}

/// Reports a fatal capture error, ending the session
#[derive(Clone)]
pub struct DeviceFailure {
    handoff: Arc<HandoffChannel>,
}

impl DeviceFailure {
    pub fn fail(&self, err: DeviceError) {
        self.handoff.fail(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::handoff::HandoffClosed;
    use crate::stats::BridgeCounters;

    #[test]
    fn test_producer_sequences_frames() {
        let handoff = Arc::new(HandoffChannel::new(4, Arc::new(BridgeCounters::new())));
        let mut producer = FrameProducer::new(handoff.clone());

        producer.push_samples(&[0.0; 4]);
        producer.push_samples(&[0.0; 4]);
        assert_eq!(producer.next_sequence(), 2);

        assert_eq!(handoff.try_pop().unwrap().sequence, 0);
        assert_eq!(handoff.try_pop().unwrap().sequence, 1);
    }

    #[test]
    fn test_pooled_frames_keep_their_samples() {
        let handoff = Arc::new(HandoffChannel::new(8, Arc::new(BridgeCounters::new())));
        let mut producer = FrameProducer::new(handoff.clone());

        producer.push_samples(&[0.5, -0.5]);
        producer.push_samples(&[0.25, -0.25, 1.0]);

        let first = handoff.try_pop().unwrap();
        let second = handoff.try_pop().unwrap();
        assert_eq!(first.samples(), vec![0.5, -0.5]);
        assert_eq!(second.samples(), vec![0.25, -0.25, 1.0]);
        assert_eq!(first, Frame::from_samples(0, &[0.5, -0.5]));
    }

    #[test]
    fn test_push_samples_does_not_allocate_per_frame() {
        const FRAMES: usize = 100;
        // 256 samples per frame fills a 64 KiB slab every 64 frames
        let samples = [0.125f32; 256];

        let counters = Arc::new(BridgeCounters::new());
        let handoff = Arc::new(HandoffChannel::new(4, counters.clone()));
        let mut producer = FrameProducer::new(handoff.clone());

        let mut allocations = 0;
        for _ in 0..FRAMES {
            let (outcome, n) = counting::allocations_during(|| producer.push_samples(&samples));
            assert_eq!(outcome, PushOutcome::Queued);
            allocations += n;

            // Broadcast side, off the capture context
            drop(handoff.try_pop());
            handoff.pool().replenish();
        }

        // Only the shared header of each slab touched
        assert!(allocations <= 2, "{} allocations for {} frames", allocations, FRAMES);
        assert_eq!(counters.snapshot().capture_allocations, 0);
    }

    #[test]
    fn test_evicted_frames_are_not_freed_on_capture_context() {
        let counters = Arc::new(BridgeCounters::new());
        let handoff = Arc::new(HandoffChannel::new(1, counters.clone()));
        let mut producer = FrameProducer::new(handoff.clone());

        // Fresh storage so eviction is the only owner of the first frame
        producer.push(Frame::new(0, bytes::Bytes::from(vec![0u8; 1024])));

        let (outcome, _) = counting::allocations_during(|| producer.push_samples(&[1.0; 4]));
        assert_eq!(outcome, PushOutcome::Displaced);
        assert_eq!(counting::frees_during(|| producer.push_samples(&[1.0; 4])).1, 0);
        assert_eq!(counters.snapshot().handoff_overflows, 2);
    }

    mod counting {
        //! Per-thread allocation counts for the capture-context tests

        use std::alloc::{GlobalAlloc, Layout, System};
        use std::cell::Cell;

        struct CountingAlloc;

        thread_local! {
            static ACTIVE: Cell<bool> = const { Cell::new(false) };
            static ALLOCS: Cell<usize> = const { Cell::new(0) };
            static FREES: Cell<usize> = const { Cell::new(0) };
        }

        fn bump(counter: &'static std::thread::LocalKey<Cell<usize>>) {
            if ACTIVE.try_with(|a| a.get()).unwrap_or(false) {
                let _ = counter.try_with(|c| c.set(c.get() + 1));
            }
        }

        unsafe impl GlobalAlloc for CountingAlloc {
            unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
                bump(&ALLOCS);
                System.alloc(layout)
            }

            unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
                bump(&FREES);
                System.dealloc(ptr, layout)
            }
        }

        #[global_allocator]
        static GLOBAL: CountingAlloc = CountingAlloc;

        fn measure<R>(counter: &'static std::thread::LocalKey<Cell<usize>>, f: impl FnOnce() -> R) -> (R, usize) {
            counter.with(|c| c.set(0));
            ACTIVE.with(|a| a.set(true));
            let result = f();
            ACTIVE.with(|a| a.set(false));
            (result, counter.with(|c| c.get()))
        }

        pub fn allocations_during<R>(f: impl FnOnce() -> R) -> (R, usize) {
            measure(&ALLOCS, f)
        }

        pub fn frees_during<R>(f: impl FnOnce() -> R) -> (R, usize) {
            measure(&FREES, f)
        }
    }

    #[test]
    fn test_failure_handle_closes_handoff() {
        let handoff = Arc::new(HandoffChannel::new(4, Arc::new(BridgeCounters::new())));
        let producer = FrameProducer::new(handoff.clone());

        producer
            .failure_handle()
            .fail(DeviceError::Stream("overrun".into()));

        assert!(producer.is_closed());
        assert_eq!(
            handoff.closed_reason(),
            Some(&HandoffClosed::Device(DeviceError::Stream("overrun".into())))
        );
    }
}
