//! Audio frame and session metadata types
//!
//! A [`Frame`] is one capture block of interleaved `f32` samples, already in
//! wire format. Channel count and sample rate live in [`SessionParams`] and are
//! never repeated per frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{Error, Result};

/// Size of one serialized sample (IEEE-754 single precision)
pub const SAMPLE_BYTES: usize = 4;

/// Unique identifier for a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Parameters fixed for the lifetime of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionParams {
    /// Interleaved channel count
    pub channels: u16,
    /// Samples per second per channel
    pub sample_rate: u32,
}

impl SessionParams {
    /// Create validated session parameters
    pub fn new(channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidParams("channel count must be non-zero".into()));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidParams("sample rate must be non-zero".into()));
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Serialized size of `frames` sample frames (one sample per channel each)
    pub fn frame_bytes(&self, frames: usize) -> usize {
        frames * self.channels as usize * SAMPLE_BYTES
    }
}

/// A block of captured audio, ready to send
///
/// Cheap to clone: all subscribers share the same `Bytes` allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Capture order, assigned by the producer
    pub sequence: u64,
    /// Little-endian f32 samples, interleaved
    pub data: Bytes,
}

impl Frame {
    /// Wrap an already-serialized payload
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }

    /// Serialize interleaved samples into a frame
    pub fn from_samples(sequence: u64, samples: &[f32]) -> Self {
        let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_BYTES);
        for &sample in samples {
            buf.put_f32_le(sample);
        }

        Self {
            sequence,
            data: buf.freeze(),
        }
    }

    /// Decode the payload back into samples
    pub fn samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(SAMPLE_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Number of samples across all channels
    pub fn sample_count(&self) -> usize {
        self.data.len() / SAMPLE_BYTES
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
