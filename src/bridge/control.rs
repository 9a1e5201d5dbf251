//! Bridge control surface
//!
//! [`AudioBridge`] owns the capture source and the subscriber acceptor, and
//! builds a fresh handoff, registry and broadcast engine for every capture
//! session. Only one session runs at a time.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BridgeState, BroadcastEngine, EngineExit};
use crate::capture::{CaptureSource, FrameProducer, HandoffChannel};
use crate::error::{DeviceError, Error, Result};
use crate::registry::{RegistryConfig, SessionParams, SubscriberRegistry};
use crate::server::{AcceptContext, Acceptor};
use crate::stats::{BridgeCounters, BridgeStats};

use super::config::BridgeConfig;

/// Point-in-time view of the bridge
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub subscriber_count: usize,
    /// Parameters of the running session
    pub params: Option<SessionParams>,
    /// Failure that ended the most recent session, if any
    pub last_error: Option<String>,
    /// Counters of the current or most recent session
    pub stats: Option<BridgeStats>,
}

/// Everything tied to one capture session
struct ActiveSession {
    params: SessionParams,
    handoff: Arc<HandoffChannel>,
    registry: Arc<SubscriberRegistry>,
    counters: Arc<BridgeCounters>,
    shutdown: CancellationToken,
    engine: JoinHandle<EngineExit>,
    acceptor: Option<JoinHandle<()>>,
}

/// Capture-to-broadcast bridge
pub struct AudioBridge<S: CaptureSource> {
    config: BridgeConfig,
    registry_config: RegistryConfig,
    source: S,
    acceptor: Option<Arc<dyn Acceptor>>,
    state: Arc<watch::Sender<BridgeState>>,
    last_error: Arc<Mutex<Option<DeviceError>>>,
    active: Option<ActiveSession>,
}

impl<S: CaptureSource> AudioBridge<S> {
    /// Create a bridge around a capture source, with no acceptor
    pub fn new(config: BridgeConfig, source: S) -> Self {
        let (state, _) = watch::channel(BridgeState::Idle);

        Self {
            config,
            registry_config: RegistryConfig::default(),
            source,
            acceptor: None,
            state: Arc::new(state),
            last_error: Arc::new(Mutex::new(None)),
            active: None,
        }
    }

    /// Set per-session registry limits
    pub fn with_registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Accept subscribers through `acceptor` while a session runs
    pub fn with_acceptor<A: Acceptor>(mut self, acceptor: A) -> Self {
        self.acceptor = Some(Arc::new(acceptor));
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Address the acceptor is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().and_then(|a| a.local_addr())
    }

    /// Start a capture session
    ///
    /// Fails if a session is already running, the parameters are invalid,
    /// the acceptor cannot bind or the device cannot be opened. On failure
    /// the bridge stays idle.
    pub async fn start(&mut self, channels: u16, sample_rate: u32) -> Result<()> {
        if self.state.borrow().is_active() {
            return Err(Error::AlreadyRunning);
        }

        // A session that ended on a device failure still holds its tasks
        if let Some(stale) = self.active.take() {
            self.teardown(stale).await;
        }

        let params = SessionParams::new(channels, sample_rate)?;

        let counters = Arc::new(BridgeCounters::new());
        let handoff = Arc::new(HandoffChannel::new(
            self.config.handoff_capacity,
            counters.clone(),
        ));
        let registry = Arc::new(SubscriberRegistry::with_config(
            self.registry_config.clone(),
            counters.clone(),
        ));

        let engine = BroadcastEngine::new(
            handoff.clone(),
            registry.clone(),
            counters.clone(),
            self.state.clone(),
            self.config.drain_timeout,
        )
        .error_slot(self.last_error.clone());
        let shutdown = engine.shutdown_token();

        let accept_loop = match self.acceptor {
            Some(ref acceptor) => Some(acceptor.serve(AcceptContext {
                registry: registry.clone(),
                params,
                shutdown: shutdown.clone(),
            })?),
            None => None,
        };

        if let Err(e) = self
            .source
            .open(params, FrameProducer::new(handoff.clone()))
        {
            tracing::error!(error = %e, "Failed to open capture source");
            shutdown.cancel();
            return Err(e.into());
        }

        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.send_replace(BridgeState::Running);

        let engine = tokio::spawn(engine.run());
        let acceptor = accept_loop.map(tokio::spawn);

        tracing::info!(
            channels = params.channels,
            sample_rate = params.sample_rate,
            "Audio bridge started"
        );

        self.active = Some(ActiveSession {
            params,
            handoff,
            registry,
            counters,
            shutdown,
            engine,
            acceptor,
        });

        Ok(())
    }

    /// Stop the running session
    ///
    /// Capture stops first, then subscribers get a bounded grace period for
    /// in-flight writes before every session is closed. A no-op when idle.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            tracing::debug!("Stop requested while idle");
            return;
        };

        tracing::info!("Stopping audio bridge");
        self.teardown(active).await;
        tracing::info!("Audio bridge stopped");
    }

    /// Close the capture source, which may join a capture thread
    ///
    /// On a multi-threaded runtime the worker hands its other tasks off
    /// while the source closes.
    fn close_source(&mut self) {
        let source = &mut self.source;
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| source.close()),
            _ => source.close(),
        }
    }

    async fn teardown(&mut self, active: ActiveSession) {
        self.close_source();
        active.handoff.close();
        // No new subscribers once draining begins
        active.shutdown.cancel();

        match active.engine.await {
            Ok(EngineExit::Stopped) => {}
            Ok(EngineExit::DeviceFailed(e)) => {
                tracing::debug!(error = %e, "Session had already ended on device failure");
            }
            Err(e) => {
                tracing::error!(error = %e, "Broadcast engine task failed");
                self.state.send_replace(BridgeState::Idle);
            }
        }

        if let Some(acceptor) = active.acceptor {
            if let Err(e) = acceptor.await {
                tracing::error!(error = %e, "Acceptor task failed");
            }
        }
    }

    /// Current bridge status
    pub fn status(&self) -> BridgeStatus {
        let state = *self.state.borrow();
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|e| e.to_string());

        match self.active {
            Some(ref active) => BridgeStatus {
                state,
                subscriber_count: active.registry.len(),
                params: state.is_active().then_some(active.params),
                last_error,
                stats: Some(active.counters.snapshot()),
            },
            None => BridgeStatus {
                state,
                subscriber_count: 0,
                params: None,
                last_error,
                stats: None,
            },
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Failure that ended the most recent session
    pub fn last_error(&self) -> Option<DeviceError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Registry of the running session
    pub fn registry(&self) -> Option<Arc<SubscriberRegistry>> {
        self.active
            .as_ref()
            .filter(|_| self.state.borrow().is_active())
            .map(|active| active.registry.clone())
    }

    /// Subscribe to state transitions
    pub fn state_changes(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }
}

impl<S: CaptureSource> Drop for AudioBridge<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.close_source();
            active.handoff.close();
            active.shutdown.cancel();
        }
    }
}
