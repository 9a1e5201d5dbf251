//! Subscriber registry for audio fan-out
//!
//! The registry holds the live subscriber sessions of one capture session.
//! It is created at `start`, shared by the acceptor and the broadcast engine,
//! and torn down at `stop`.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<SubscriberRegistry>
//!                  ┌───────────────────────────┐
//!                  │ sessions: BTreeMap<Id,    │
//!                  │   Arc<SubscriberSession>> │
//!                  └─────────────┬─────────────┘
//!          attach() / remove()   │   snapshot()
//!   [Acceptor] ──────────────────┼──────────────── [BroadcastEngine]
//!                                │
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!       [Session 1]         [Session 2]         [Session 3]
//!       writer task         writer task         writer task
//!            │                   │                   │
//!            └──► FrameSink::send() ──► WebSocket ◄──┘
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` is reference counted, so every subscriber's queue holds the
//! same allocation for a given frame.

pub mod config;
pub mod frame;
pub mod store;

pub use config::RegistryConfig;
pub use frame::{Frame, SessionParams, SubscriberId};
pub use store::SubscriberRegistry;
