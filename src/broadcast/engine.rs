//! Broadcast engine
//!
//! The engine pulls frames from the handoff and offers each one to every
//! subscriber in a registry snapshot. Offers never wait: a lagging subscriber
//! loses its oldest pending frame, a closed one is skipped, and neither
//! affects anyone else.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capture::handoff::{HandoffChannel, HandoffClosed};
use crate::error::DeviceError;
use crate::registry::frame::Frame;
use crate::registry::store::SubscriberRegistry;
use crate::session::EnqueueOutcome;
use crate::stats::BridgeCounters;

use super::state::BridgeState;

/// How long force-closed sessions get to finish their writers
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the engine loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// Stop requested; subscribers were drained
    Stopped,
    /// Capture source failed
    DeviceFailed(DeviceError),
}

/// Outcome of fanning out one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers that queued the frame without loss
    pub queued: usize,
    /// Subscribers that queued it after dropping an older frame
    pub lagged: usize,
    /// Subscribers already closed
    pub closed: usize,
}

/// Fan-out loop for one capture session
pub struct BroadcastEngine {
    handoff: Arc<HandoffChannel>,
    registry: Arc<SubscriberRegistry>,
    counters: Arc<BridgeCounters>,
    state: Arc<watch::Sender<BridgeState>>,
    drain_timeout: Duration,
    shutdown: CancellationToken,
    error_slot: Option<Arc<Mutex<Option<DeviceError>>>>,
}

impl BroadcastEngine {
    pub fn new(
        handoff: Arc<HandoffChannel>,
        registry: Arc<SubscriberRegistry>,
        counters: Arc<BridgeCounters>,
        state: Arc<watch::Sender<BridgeState>>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            handoff,
            registry,
            counters,
            state,
            drain_timeout,
            shutdown: CancellationToken::new(),
            error_slot: None,
        }
    }

    /// Record a device failure here before the state returns to Idle
    pub fn error_slot(mut self, slot: Arc<Mutex<Option<DeviceError>>>) -> Self {
        self.error_slot = Some(slot);
        self
    }

    /// Token cancelled when the engine exits, for tasks tied to this session
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the handoff closes
    pub async fn run(self) -> EngineExit {
        self.state.send_replace(BridgeState::Running);
        tracing::debug!("Broadcast engine running");

        let mut overflows_seen = 0;

        let exit = loop {
            match self.handoff.recv().await {
                Ok(frame) => {
                    self.report_overflows(&mut overflows_seen);
                    self.broadcast(frame).await;
                    self.handoff.pool().replenish();
                    // Let writers run between frames of a backlog
                    tokio::task::yield_now().await;
                }
                Err(HandoffClosed::Stopped) => {
                    self.drain().await;
                    break EngineExit::Stopped;
                }
                Err(HandoffClosed::Device(err)) => {
                    tracing::error!(error = %err, "Capture failed, ending session");
                    if let Some(ref slot) = self.error_slot {
                        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.clone());
                    }
                    self.registry.close_all().await;
                    break EngineExit::DeviceFailed(err);
                }
            }
        };

        self.shutdown.cancel();
        self.state.send_replace(BridgeState::Idle);

        let stats = self.counters.snapshot();
        tracing::info!(
            captured = stats.frames_captured,
            broadcast = stats.frames_broadcast,
            unheard = stats.frames_unheard,
            overflows = stats.handoff_overflows,
            "Broadcast engine stopped"
        );

        exit
    }

    /// Offer one frame to every live subscriber
    pub async fn broadcast(&self, frame: Frame) -> FanOut {
        let sessions = self.registry.snapshot().await;
        let mut fan_out = FanOut::default();

        if sessions.is_empty() {
            // Nobody listening
            self.counters.on_unheard();
            return fan_out;
        }

        for session in &sessions {
            match session.enqueue(frame.clone()) {
                EnqueueOutcome::Queued => fan_out.queued += 1,
                EnqueueOutcome::DroppedOldest => fan_out.lagged += 1,
                EnqueueOutcome::Closed => fan_out.closed += 1,
            }
        }

        self.counters.on_broadcast();
        tracing::trace!(
            sequence = frame.sequence,
            queued = fan_out.queued,
            lagged = fan_out.lagged,
            closed = fan_out.closed,
            "Frame broadcast"
        );

        fan_out
    }

    fn report_overflows(&self, seen: &mut u64) {
        let total = self.counters.handoff_overflows();
        if total > *seen {
            tracing::debug!(
                dropped = total - *seen,
                total = total,
                "Handoff overflow, broadcast falling behind capture"
            );
            *seen = total;
        }
    }

    /// Give in-flight writes a bounded grace period, then force-close
    async fn drain(&self) {
        self.state.send_replace(BridgeState::Draining);

        let sessions = self.registry.snapshot().await;
        tracing::info!(
            subscribers = sessions.len(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Draining subscribers"
        );

        let settled = join_all(sessions.iter().map(|s| s.settled()));
        if tokio::time::timeout(self.drain_timeout, settled).await.is_err() {
            let unsettled = sessions.iter().filter(|s| !s.is_idle()).count();
            tracing::warn!(
                unsettled = unsettled,
                "Drain timeout elapsed, closing remaining subscribers"
            );
        }

        self.registry.close_all().await;

        let finished = join_all(sessions.iter().map(|s| s.finished()));
        if tokio::time::timeout(CLOSE_TIMEOUT, finished).await.is_err() {
            tracing::warn!("Subscriber writers still closing after drain");
        }
    }
}
