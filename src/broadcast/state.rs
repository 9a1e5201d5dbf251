//! Bridge lifecycle state

use serde::Serialize;

/// Lifecycle of a capture session
///
/// ```text
///   Idle ──start──► Running ──stop──► Draining ──settled/timeout──► Idle
///                      │
///                      └──device error──────────────────────────► Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// No capture session
    #[default]
    Idle,
    /// Capturing and broadcasting
    Running,
    /// Stop requested, waiting for in-flight writes
    Draining,
}

impl BridgeState {
    /// Whether a capture session exists in any phase
    pub fn is_active(&self) -> bool {
        !matches!(self, BridgeState::Idle)
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Idle => write!(f, "Idle"),
            BridgeState::Running => write!(f, "Running"),
            BridgeState::Draining => write!(f, "Draining"),
        }
    }
}
