//! Real-time audio capture to WebSocket broadcast bridge
//!
//! Audio frames are captured on the device's timing-critical context, handed
//! to an async broadcast task through a lock-free drop-oldest buffer, and
//! fanned out to every connected subscriber. A slow subscriber loses its own
//! oldest frames and never holds back capture or anyone else.
//!
//! # Example
//!
//! ```no_run
//! use audio_bridge::{AudioBridge, BridgeConfig, ToneSource, WsAcceptor};
//!
//! # async fn run() -> audio_bridge::Result<()> {
//! let mut bridge = AudioBridge::new(BridgeConfig::default(), ToneSource::new(440.0))
//!     .with_acceptor(WsAcceptor::default());
//!
//! bridge.start(2, 48000).await?;
//! tokio::signal::ctrl_c().await?;
//! bridge.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Wire format
//!
//! Each frame is one binary WebSocket message of interleaved little-endian
//! `f32` samples.

pub mod bridge;
pub mod broadcast;
pub mod capture;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use bridge::{AudioBridge, BridgeConfig, BridgeStatus};
pub use broadcast::BridgeState;
#[cfg(feature = "device")]
pub use capture::CpalSource;
pub use capture::{CaptureSource, FrameProducer, ToneSource};
pub use error::{DeviceError, Error, Result, TransportError};
pub use registry::{Frame, RegistryConfig, SessionParams, SubscriberId};
pub use server::{ServerConfig, WsAcceptor};
