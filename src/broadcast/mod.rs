//! Frame fan-out
//!
//! [`BroadcastEngine`] is the consumer side of the handoff and the only
//! reader of the subscriber registry.

pub mod engine;
pub mod state;

pub use engine::{BroadcastEngine, EngineExit, FanOut};
pub use state::BridgeState;
