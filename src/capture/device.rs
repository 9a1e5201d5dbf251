//! Capture from the default input device via cpal
//!
//! The cpal stream lives on a dedicated thread for its whole life: some
//! backends hand out `!Send` streams, so the stream is built, played and
//! dropped on the same thread. The audio callback converts samples to `f32`
//! into a reusable scratch buffer and pushes one frame into the handoff.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};

use crate::error::DeviceError;
use crate::registry::frame::SessionParams;

use super::source::{CaptureSource, DeviceFailure, FrameProducer};

/// Channel ceiling applied when choosing session parameters
pub const MAX_CHANNELS: u16 = 2;

/// Default input device capture
pub struct CpalSource {
    buffer_size: Option<u32>,
    worker: Option<Worker>,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl CpalSource {
    pub fn new() -> Self {
        Self {
            buffer_size: None,
            worker: None,
        }
    }

    /// Request a fixed callback size in sample frames
    pub fn buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = Some(frames);
        self
    }

    /// Session parameters for the default input device
    ///
    /// At most two channels at the device's default sample rate.
    pub fn preferred_params() -> Result<SessionParams, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?;

        let default = device
            .default_input_config()
            .map_err(|e| DeviceError::Unsupported(e.to_string()))?;

        let max_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0)
            .max(default.channels());

        let channels = max_channels.min(MAX_CHANNELS);
        SessionParams::new(channels, default.sample_rate().0)
            .map_err(|e| DeviceError::Unsupported(e.to_string()))
    }
}

impl Default for CpalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for CpalSource {
    fn open(&mut self, params: SessionParams, producer: FrameProducer) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::StreamBuild("capture already open".into()));
        }

        let buffer_size = self.buffer_size;
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match build_stream(params, buffer_size, producer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::StreamBuild(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until close() or the source is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    channels = params.channels,
                    sample_rate = params.sample_rate,
                    "Audio capture started"
                );
                self.worker = Some(Worker { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::StreamBuild("capture thread exited".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                tracing::warn!("Audio capture thread panicked");
            }
            tracing::info!("Audio capture stopped");
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    params: SessionParams,
    buffer_size: Option<u32>,
    producer: FrameProducer,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(DeviceError::NoInputDevice)?;

    tracing::debug!(device = ?device.name().ok(), "Using audio input device");

    let sample_format = device
        .default_input_config()
        .map_err(|e| DeviceError::Unsupported(e.to_string()))?
        .sample_format();

    let config = StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: match buffer_size {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    };

    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, producer),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, producer),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, producer),
        other => Err(DeviceError::Unsupported(format!(
            "sample format {:?}",
            other
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: FrameProducer,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let failure = producer.failure_handle();
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                producer.push_samples(&scratch);
            },
            move |err| on_stream_error(&failure, err),
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))
}

fn on_stream_error(failure: &DeviceFailure, err: cpal::StreamError) {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            tracing::error!("Audio input device disconnected");
            failure.fail(DeviceError::Disconnected);
        }
        // Backends report xruns this way; only the device vanishing is fatal
        other => tracing::warn!(error = %other, "Audio stream status"),
    }
}
