//! Per-subscriber delivery state
//!
//! Each session owns a small outbound queue drained by its own writer task,
//! so a slow connection only ever delays itself:
//!
//! ```text
//!   engine ──enqueue()──► [ pending (≤ M) ] ──► writer task ──► FrameSink::send
//!                              │                    │
//!                   full: oldest dropped      one send in flight
//! ```
//!
//! A send error or a transport-detected disconnect closes the session; the
//! writer then closes the sink and removes the session from the registry.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::registry::frame::{Frame, SubscriberId};
use crate::registry::store::SubscriberRegistry;
use crate::stats::{SubscriberCounters, SubscriberStats};

use super::sink::FrameSink;

/// Result of offering a frame to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame queued
    Queued,
    /// Frame queued after dropping the oldest pending frame
    DroppedOldest,
    /// Session closed, frame discarded
    Closed,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepting frames
    Open,
    /// No further delivery
    Closed,
}

#[derive(Debug)]
struct Outbound {
    pending: VecDeque<Frame>,
    capacity: usize,
    in_flight: bool,
}

/// Delivery state for one connected subscriber
pub struct SubscriberSession {
    id: SubscriberId,
    peer_addr: Option<SocketAddr>,
    connected_at: Instant,
    outbound: Mutex<Outbound>,
    /// Wakes the writer when a frame is queued
    wake: Notify,
    /// Signalled whenever the writer goes idle or exits
    settle: Notify,
    closed: CancellationToken,
    finished: CancellationToken,
    counters: SubscriberCounters,
}

impl SubscriberSession {
    pub(crate) fn new(id: SubscriberId, peer_addr: Option<SocketAddr>, capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            outbound: Mutex::new(Outbound {
                pending: VecDeque::with_capacity(capacity),
                capacity,
                in_flight: false,
            }),
            wake: Notify::new(),
            settle: Notify::new(),
            closed: CancellationToken::new(),
            finished: CancellationToken::new(),
            counters: SubscriberCounters::default(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Time since the subscriber connected
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.closed.is_cancelled() {
            SessionPhase::Closed
        } else {
            SessionPhase::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn stats(&self) -> SubscriberStats {
        self.counters.snapshot()
    }

    /// Frames waiting behind the in-flight write
    pub fn pending(&self) -> usize {
        self.outbound().pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.outbound().in_flight
    }

    /// Nothing queued and nothing in flight
    pub fn is_idle(&self) -> bool {
        let outbound = self.outbound();
        outbound.pending.is_empty() && !outbound.in_flight
    }

    fn outbound(&self) -> MutexGuard<'_, Outbound> {
        // The lock is never held across an await or a call that can panic
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offer a frame without waiting
    ///
    /// When `capacity` frames are already pending the oldest is dropped so
    /// the subscriber stays as close to live as possible.
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Closed;
        }

        let outcome = {
            let mut outbound = self.outbound();
            let outcome = if outbound.pending.len() >= outbound.capacity {
                outbound.pending.pop_front();
                EnqueueOutcome::DroppedOldest
            } else {
                EnqueueOutcome::Queued
            };
            outbound.pending.push_back(frame);
            outcome
        };

        if outcome == EnqueueOutcome::DroppedOldest {
            let dropped = self.counters.on_dropped();
            tracing::debug!(
                subscriber = %self.id,
                dropped = dropped,
                "Subscriber lagging, dropped oldest frame"
            );
        }

        self.wake.notify_one();
        outcome
    }

    /// Stop delivery
    ///
    /// Safe to call from any task, any number of times. An in-flight write is
    /// abandoned.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::debug!(subscriber = %self.id, "Subscriber session closing");
            self.closed.cancel();
            self.settle.notify_waiters();
        }
    }

    /// Resolves once the session is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Resolves once the writer has exited and the session left the registry
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    /// Resolves once the queue is empty with no write in flight, or the
    /// session is closed
    pub async fn settled(&self) {
        loop {
            let notified = self.settle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() || self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn next_frame(&self) -> Option<Frame> {
        let mut outbound = self.outbound();
        let frame = outbound.pending.pop_front();
        outbound.in_flight = frame.is_some();
        frame
    }

    fn finish_write(&self) {
        self.outbound().in_flight = false;
    }

    /// Writer loop: one send at a time, in queue order
    pub(crate) async fn run_writer<S: FrameSink>(
        &self,
        mut sink: S,
        registry: Weak<SubscriberRegistry>,
    ) {
        loop {
            if self.is_closed() {
                break;
            }

            let frame = match self.next_frame() {
                Some(frame) => frame,
                None => {
                    self.settle.notify_waiters();
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = self.closed.cancelled() => break,
                    }
                    continue;
                }
            };

            let len = frame.len();
            let result = tokio::select! {
                biased;
                _ = self.closed.cancelled() => None,
                result = sink.send(frame.data) => Some(result),
            };
            self.finish_write();

            match result {
                Some(Ok(())) => self.counters.on_delivered(len),
                Some(Err(e)) => {
                    tracing::info!(
                        subscriber = %self.id,
                        error = %e,
                        "Subscriber write failed"
                    );
                    self.close();
                    break;
                }
                None => break,
            }
        }

        self.close();
        sink.close().await;

        if let Some(registry) = registry.upgrade() {
            registry.remove(self.id).await;
        }

        let stats = self.stats();
        tracing::info!(
            subscriber = %self.id,
            delivered = stats.frames_delivered,
            dropped = stats.frames_dropped,
            bytes = stats.bytes_sent,
            duration_ms = self.duration().as_millis() as u64,
            "Subscriber session finished"
        );

        self.finished.cancel();
        self.settle.notify_waiters();
    }
}

impl std::fmt::Debug for SubscriberSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::sink::testing::test_sink;

    fn frame(seq: u64) -> Frame {
        Frame::from_samples(seq, &[seq as f32, 0.0])
    }

    fn spawn_writer<S: FrameSink>(session: &Arc<SubscriberSession>, sink: S) {
        let session = session.clone();
        tokio::spawn(async move { session.run_writer(sink, Weak::new()).await });
    }

    #[test]
    fn test_enqueue_drops_oldest_when_full() {
        let session = SubscriberSession::new(SubscriberId(1), None, 2);

        assert_eq!(session.enqueue(frame(0)), EnqueueOutcome::Queued);
        assert_eq!(session.enqueue(frame(1)), EnqueueOutcome::Queued);
        assert_eq!(session.enqueue(frame(2)), EnqueueOutcome::DroppedOldest);

        assert_eq!(session.pending(), 2);
        assert_eq!(session.next_frame().unwrap().sequence, 1);
        assert_eq!(session.next_frame().unwrap().sequence, 2);
        assert_eq!(session.stats().frames_dropped, 1);
    }

    #[test]
    fn test_closed_session_rejects_frames() {
        let session = SubscriberSession::new(SubscriberId(1), None, 2);

        session.close();
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(session.enqueue(frame(0)), EnqueueOutcome::Closed);
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_writer_delivers_in_order() {
        let session = Arc::new(SubscriberSession::new(SubscriberId(1), None, 8));
        let (sink, mut tap) = test_sink();
        spawn_writer(&session, sink);

        for seq in 0..5 {
            session.enqueue(frame(seq));
        }

        assert_eq!(tap.next_seqs(5).await, vec![0, 1, 2, 3, 4]);

        session.settled().await;
        let stats = session.stats();
        assert_eq!(stats.frames_delivered, 5);
        assert_eq!(stats.bytes_sent, 5 * 8);
    }

    #[tokio::test]
    async fn test_stalled_writer_keeps_freshest_frames() {
        let session = Arc::new(SubscriberSession::new(SubscriberId(1), None, 2));
        let (sink, mut tap) = test_sink();
        spawn_writer(&session, sink);

        tap.stall();
        session.enqueue(frame(0));

        // Wait for frame 0 to be picked up by the writer
        while !session.is_in_flight() {
            tokio::task::yield_now().await;
        }

        for seq in 1..=6 {
            assert_ne!(session.enqueue(frame(seq)), EnqueueOutcome::Closed);
        }
        assert_eq!(session.pending(), 2);

        tap.release();

        // In-flight frame completes, then the two most recent
        assert_eq!(tap.next_seqs(3).await, vec![0, 5, 6]);
        assert_eq!(session.stats().frames_dropped, 4);
    }

    #[tokio::test]
    async fn test_send_error_closes_session() {
        let session = Arc::new(SubscriberSession::new(SubscriberId(1), None, 4));
        let (sink, tap) = test_sink();
        spawn_writer(&session, sink);

        tap.fail_sends();
        session.enqueue(frame(0));

        tokio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("writer did not exit");

        assert!(session.is_closed());
        assert!(tap.was_closed());
        assert_eq!(session.enqueue(frame(1)), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_during_in_flight_write() {
        let session = Arc::new(SubscriberSession::new(SubscriberId(1), None, 4));
        let (sink, mut tap) = test_sink();
        spawn_writer(&session, sink);

        tap.stall();
        session.enqueue(frame(0));
        while !session.is_in_flight() {
            tokio::task::yield_now().await;
        }

        session.close();
        tokio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("writer did not exit");

        tap.release();
        assert!(tap.drain_seqs().is_empty());
        assert!(!session.is_in_flight());
        assert!(tap.was_closed());
    }

    #[tokio::test]
    async fn test_settled_waits_for_in_flight_write() {
        let session = Arc::new(SubscriberSession::new(SubscriberId(1), None, 4));
        let (sink, mut tap) = test_sink();
        spawn_writer(&session, sink);

        tap.stall();
        session.enqueue(frame(0));
        while !session.is_in_flight() {
            tokio::task::yield_now().await;
        }

        let settled = tokio::time::timeout(Duration::from_millis(50), session.settled()).await;
        assert!(settled.is_err());

        tap.release();
        tokio::time::timeout(Duration::from_secs(2), session.settled())
            .await
            .expect("session never settled");
        assert_eq!(tap.next_seqs(1).await, vec![0]);
    }
}
