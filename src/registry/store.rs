//! Subscriber registry implementation
//!
//! The live set of subscriber sessions for one capture session. Mutated by
//! the acceptor (attach) and by sessions closing (remove); read by the
//! broadcast engine through point-in-time snapshots.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::session::{FrameSink, SubscriberSession};
use crate::stats::BridgeCounters;

use super::config::RegistryConfig;
use super::frame::SubscriberId;

/// Registry of live subscribers
///
/// Thread-safe via `RwLock`. Broadcasting only needs the read side, so
/// snapshots never wait on each other.
pub struct SubscriberRegistry {
    /// Live sessions ordered by join order
    sessions: RwLock<BTreeMap<SubscriberId, Arc<SubscriberSession>>>,

    /// Mirrors `sessions.len()` for lock-free status reads
    count: AtomicUsize,

    next_id: AtomicU64,

    /// Set once the capture session ends
    closed: AtomicBool,

    config: RegistryConfig,

    counters: Arc<BridgeCounters>,
}

impl SubscriberRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), Arc::new(BridgeCounters::new()))
    }

    /// Create a registry reporting into `counters`
    pub fn with_config(config: RegistryConfig, counters: Arc<BridgeCounters>) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            count: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
            counters,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a session for a new connection and start its writer
    ///
    /// Fails if the registry is full or already closed; the sink is dropped
    /// in that case, which closes the connection.
    pub async fn attach<S: FrameSink>(
        self: &Arc<Self>,
        sink: S,
        peer_addr: Option<SocketAddr>,
    ) -> Result<Arc<SubscriberSession>> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(SubscriberSession::new(
            id,
            peer_addr,
            self.config.queue_capacity,
        ));

        self.add(session.clone()).await?;

        let writer = session.clone();
        let registry = Arc::downgrade(self);
        tokio::spawn(async move { writer.run_writer(sink, registry).await });

        Ok(session)
    }

    /// Add a session
    pub async fn add(&self, session: Arc<SubscriberSession>) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::RegistryClosed);
        }

        let max = self.config.max_subscribers;
        if max > 0 && sessions.len() >= max {
            tracing::warn!(
                subscriber = %session.id(),
                max = max,
                "Subscriber rejected: limit reached"
            );
            return Err(Error::SubscriberLimit(max));
        }

        let id = session.id();
        sessions.insert(id, session);
        self.count.store(sessions.len(), Ordering::Release);
        self.counters.on_subscriber();

        tracing::info!(
            subscriber = %id,
            subscribers = sessions.len(),
            "Subscriber added"
        );

        Ok(())
    }

    /// Remove a session; delivery to it stops
    pub async fn remove(&self, id: SubscriberId) -> Option<Arc<SubscriberSession>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        self.count.store(sessions.len(), Ordering::Release);

        if let Some(ref session) = removed {
            session.close();
            tracing::info!(
                subscriber = %id,
                subscribers = sessions.len(),
                "Subscriber removed"
            );
        }

        removed
    }

    /// Point-in-time copy of the live sessions
    ///
    /// Later adds and removes do not affect the returned list.
    pub async fn snapshot(&self) -> Vec<Arc<SubscriberSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: SubscriberId) -> Option<Arc<SubscriberSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new subscribers and close every live session
    ///
    /// Sessions leave the registry as their writers exit.
    pub async fn close_all(&self) {
        let sessions = {
            let sessions = self.sessions.write().await;
            self.closed.store(true, Ordering::Release);
            sessions.values().cloned().collect::<Vec<_>>()
        };

        if !sessions.is_empty() {
            tracing::info!(subscribers = sessions.len(), "Closing all subscribers");
        }
        for session in sessions {
            session.close();
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::frame::Frame;
    use crate::session::sink::testing::test_sink;

    fn frame(seq: u64) -> Frame {
        Frame::from_samples(seq, &[seq as f32])
    }

    #[tokio::test]
    async fn test_attach_and_snapshot() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink_a, _tap_a) = test_sink();
        let (sink_b, _tap_b) = test_sink();
        let a = registry.attach(sink_a, None).await.unwrap();
        let b = registry.attach(sink_b, None).await.unwrap();

        assert_eq!(registry.len(), 2);
        let ids: Vec<_> = registry.snapshot().await.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert!(registry.get(a.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_is_not_a_live_view() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink, _tap) = test_sink();
        let session = registry.attach(sink, None).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.remove(session.id()).await;

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_stops_delivery() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink, mut tap) = test_sink();
        let session = registry.attach(sink, None).await.unwrap();

        let removed = registry.remove(session.id()).await.unwrap();
        assert!(removed.is_closed());
        assert_eq!(
            session.enqueue(frame(0)),
            crate::session::EnqueueOutcome::Closed
        );
        assert!(tap.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_session_leaves_registry() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink, _tap) = test_sink();
        let session = registry.attach(sink, None).await.unwrap();

        session.close();
        tokio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("writer did not exit");

        assert!(registry.is_empty());
        assert!(registry.get(session.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_close_during_in_flight_write_leaves_registry() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink_a, tap_a) = test_sink();
        let (sink_b, mut tap_b) = test_sink();
        let a = registry.attach(sink_a, None).await.unwrap();
        let b = registry.attach(sink_b, None).await.unwrap();

        tap_a.stall();
        for session in registry.snapshot().await {
            session.enqueue(frame(0));
        }
        while !a.is_in_flight() {
            tokio::task::yield_now().await;
        }

        a.close();
        tokio::time::timeout(Duration::from_secs(2), a.finished())
            .await
            .expect("writer did not exit");

        assert!(registry.get(a.id()).await.is_none());
        assert!(registry.get(b.id()).await.is_some());
        assert_eq!(registry.len(), 1);

        for seq in 1..4 {
            for session in registry.snapshot().await {
                session.enqueue(frame(seq));
            }
        }
        assert_eq!(tap_b.next_seqs(4).await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_subscriber_limit() {
        let config = RegistryConfig::default().max_subscribers(1);
        let registry = Arc::new(SubscriberRegistry::with_config(
            config,
            Arc::new(BridgeCounters::new()),
        ));

        let (sink_a, _tap_a) = test_sink();
        let (sink_b, tap_b) = test_sink();
        registry.attach(sink_a, None).await.unwrap();

        let result = registry.attach(sink_b, None).await;
        assert!(matches!(result, Err(Error::SubscriberLimit(1))));
        assert_eq!(registry.len(), 1);
        assert!(!tap_b.was_closed()); // dropped, never driven
    }

    #[tokio::test]
    async fn test_close_all_rejects_new_subscribers() {
        let registry = Arc::new(SubscriberRegistry::new());

        let (sink, _tap) = test_sink();
        let session = registry.attach(sink, None).await.unwrap();

        registry.close_all().await;
        assert!(registry.is_closed());
        assert!(session.is_closed());

        let (late, _late_tap) = test_sink();
        assert!(matches!(
            registry.attach(late, None).await,
            Err(Error::RegistryClosed)
        ));

        tokio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("writer did not exit");
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_remove() {
        let registry = Arc::new(SubscriberRegistry::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (sink, _tap) = test_sink();
                let session = registry.attach(sink, None).await.unwrap();
                let _ = registry.snapshot().await;
                registry.remove(session.id()).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(registry.is_empty());
        assert_eq!(registry.snapshot().await.len(), 0);
    }
}
