//! Audio capture via cpal.
//!
//! Opens the default (or named) input device, captures audio at its native
//! sample rate, resamples to 16 kHz mono f32 if needed, and assembles
//! fixed-duration frames for the orchestrator.
//!
//! Two threads are involved: the cpal callback pushes raw samples into a
//! lock-free ring buffer, and a framing thread pops full frames out and
//! forwards them through a bounded channel. The channel send never blocks;
//! when the orchestrator is suspended in a long call, overflowing frames
//! are dropped here rather than stalling the device read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::ring_buffer::{sample_ring_buffer, SampleConsumer};
use super::{resample_linear, to_mono, AudioFrame, PIPELINE_SAMPLE_RATE};

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Resolved info about the audio input we will use.
struct ResolvedInput {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> anyhow::Result<ResolvedInput> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {name}"))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device available"))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .context("Failed to get default input config")?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    // We always request f32 format at the device's native rate and
    // resample ourselves.
    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {}Hz mono if needed)",
        PIPELINE_SAMPLE_RATE,
    );

    Ok(ResolvedInput {
        device,
        stream_config,
        native_rate,
    })
}

/// Handle to the running capture. The cpal stream must be kept alive for
/// as long as frames should flow; dropping the handle stops both the
/// stream and the framing thread.
pub struct CaptureHandle {
    _stream: Stream,
    stop: Arc<AtomicBool>,
    framer: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop the framing thread and release the input device.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.framer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Start audio capture, producing `frame_ms`-long 16 kHz mono frames on
/// `frames`. `device_name` of `None` uses the system default input.
///
/// `stop` is shared with the caller so an external stop request is
/// observed within one frame period.
pub fn start_capture(
    device_name: Option<&str>,
    frame_ms: u32,
    frames: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<CaptureHandle> {
    let resolved = resolve_device(device_name)?;
    let native_rate = resolved.native_rate;
    let channels = resolved.stream_config.channels;
    let needs_resample = native_rate != PIPELINE_SAMPLE_RATE;
    let needs_downmix = channels > 1;

    let (mut producer, consumer) = sample_ring_buffer(None);

    let stream = resolved
        .device
        .build_input_stream(
            &resolved.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };

                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, PIPELINE_SAMPLE_RATE)
                } else {
                    mono
                };

                let written = producer.push_slice(&resampled);
                if written < resampled.len() {
                    // Ring buffer full — oldest audio wins, the framer
                    // will catch up.
                }
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None, // no timeout
        )
        .context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;

    let framer = spawn_framer(consumer, frame_ms, frames, stop.clone());

    info!(frame_ms, "Audio capture started");

    Ok(CaptureHandle {
        _stream: stream,
        stop,
        framer: Some(framer),
    })
}

/// Framing thread: pops full frames out of the ring buffer and forwards
/// them. `try_send` keeps the capture side non-blocking; frames the
/// orchestrator has no room for are dropped.
fn spawn_framer(
    mut consumer: SampleConsumer,
    frame_ms: u32,
    frames: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let frame_samples = (PIPELINE_SAMPLE_RATE as usize * frame_ms as usize) / 1000;
    // Poll faster than the frame period so a stop request is seen within
    // one frame.
    let poll = Duration::from_millis((frame_ms / 4).max(1) as u64);

    std::thread::spawn(move || {
        let mut buf = vec![0.0f32; frame_samples];
        let mut dropped: u64 = 0;
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if consumer.pop_exact(&mut buf) {
                let frame = AudioFrame::new(buf.clone(), PIPELINE_SAMPLE_RATE);
                match frames.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        trace!(dropped, "Frame channel full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Frame channel closed, framer exiting");
                        break;
                    }
                }
            } else {
                std::thread::sleep(poll);
            }
        }
        if dropped > 0 {
            debug!(dropped, "Framer exiting; frames dropped while consumer was busy");
        }
    })
}
