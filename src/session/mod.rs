//! Subscriber sessions
//!
//! One [`SubscriberSession`] per connected client, writing through a
//! transport-provided [`FrameSink`].

pub mod sink;
pub mod subscriber;

pub use sink::FrameSink;
pub use subscriber::{EnqueueOutcome, SessionPhase, SubscriberSession};
