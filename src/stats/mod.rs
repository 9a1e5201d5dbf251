//! Bridge and subscriber statistics

pub mod metrics;

pub use metrics::{BridgeCounters, BridgeStats, SubscriberCounters, SubscriberStats};
