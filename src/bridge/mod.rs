//! Capture session control
//!
//! [`AudioBridge`] is the application-facing handle: start a capture
//! session with the device parameters, query its status, stop it.

pub mod config;
pub mod control;

pub use config::BridgeConfig;
pub use control::{AudioBridge, BridgeStatus};
