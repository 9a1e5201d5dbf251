//! Audio capture side of the bridge
//!
//! Everything here may run on the capture source's timing-critical context,
//! except [`HandoffChannel::recv`], which belongs to the broadcast task.

#[cfg(feature = "device")]
pub mod device;
pub mod handoff;
pub mod pool;
pub mod source;
pub mod tone;

#[cfg(feature = "device")]
pub use device::CpalSource;
pub use handoff::{HandoffChannel, HandoffClosed, PushOutcome};
pub use pool::FramePool;
pub use source::{CaptureSource, DeviceFailure, FrameProducer};
pub use tone::ToneSource;
