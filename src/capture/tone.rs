//! Synthetic sine-wave source
//!
//! Paces itself like a sound card: a dedicated thread emits one frame per
//! frame interval. Useful for running the bridge without audio hardware.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::DeviceError;
use crate::registry::frame::SessionParams;

use super::source::{CaptureSource, FrameProducer};

/// Default frame length in sample frames
pub const DEFAULT_FRAME_LEN: usize = 128;

/// Sine generator running on its own thread
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    frame_len: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToneSource {
    /// Create a tone source at `frequency` Hz
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            amplitude: 0.25,
            frame_len: DEFAULT_FRAME_LEN,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Set peak amplitude (clamped to 0.0..=1.0)
    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Set frame length in sample frames
    pub fn frame_len(mut self, frames: usize) -> Self {
        self.frame_len = frames.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl CaptureSource for ToneSource {
    fn open(&mut self, params: SessionParams, mut producer: FrameProducer) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Err(DeviceError::StreamBuild("tone source already open".into()));
        }

        let channels = params.channels as usize;
        let frame_len = self.frame_len;
        let step = TAU * self.frequency / params.sample_rate as f32;
        let amplitude = self.amplitude;
        let interval =
            Duration::from_secs_f64(frame_len as f64 / params.sample_rate as f64);

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();

        let thread = std::thread::Builder::new()
            .name("tone-capture".into())
            .spawn(move || {
                let mut samples = vec![0.0f32; frame_len * channels];
                let mut phase = 0.0f32;
                let mut deadline = Instant::now();

                while running.load(Ordering::Acquire) && !producer.is_closed() {
                    for frame in samples.chunks_exact_mut(channels) {
                        frame.fill(phase.sin() * amplitude);
                        phase = (phase + step) % TAU;
                    }
                    producer.push_samples(&samples);

                    deadline += interval;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    } else {
                        // Fell behind; resync instead of bursting
                        deadline = now;
                    }
                }
            })
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        self.thread = Some(thread);
        tracing::info!(
            frequency = self.frequency,
            channels = params.channels,
            sample_rate = params.sample_rate,
            frame_len = frame_len,
            "Tone capture started"
        );
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Tone capture thread panicked");
            }
            tracing::info!("Tone capture stopped");
        }
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::handoff::HandoffChannel;
    use crate::stats::BridgeCounters;

    #[test]
    fn test_tone_produces_interleaved_frames() {
        let handoff = Arc::new(HandoffChannel::new(64, Arc::new(BridgeCounters::new())));
        let params = SessionParams::new(2, 48000).unwrap();

        let mut source = ToneSource::new(440.0).frame_len(64);
        source
            .open(params, FrameProducer::new(handoff.clone()))
            .unwrap();
        assert!(source.is_running());

        std::thread::sleep(Duration::from_millis(30));
        source.close();
        assert!(!source.is_running());

        let frame = handoff.try_pop().expect("no frames produced");
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.sample_count(), 64 * 2);

        // Both channels carry the same sample
        let samples = frame.samples();
        assert_eq!(samples[2], samples[3]);
        assert!(samples.iter().all(|s| s.abs() <= 0.25));
    }

    #[test]
    fn test_open_twice_is_error() {
        let handoff = Arc::new(HandoffChannel::new(4, Arc::new(BridgeCounters::new())));
        let params = SessionParams::new(1, 8000).unwrap();

        let mut source = ToneSource::new(440.0);
        source
            .open(params, FrameProducer::new(handoff.clone()))
            .unwrap();
        let second = source.open(params, FrameProducer::new(handoff));
        assert!(matches!(second, Err(DeviceError::StreamBuild(_))));
    }
}
