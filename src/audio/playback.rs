//! Audio playback via rodio.
//!
//! Plays f32 PCM buffers through the default output device, blocking the
//! caller until the device has drained them.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use super::AudioSink;

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    use cpal::traits::{DeviceTrait, HostTrait};
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// The default audio output device.
pub struct OutputDevice {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl OutputDevice {
    /// Open the default audio output device.
    pub fn open() -> anyhow::Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| anyhow::anyhow!("Failed to open audio output: {}", e))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| anyhow::anyhow!("Failed to create audio sink: {}", e))?;

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }
}

impl AudioSink for OutputDevice {
    /// Play mono f32 samples at the given rate, blocking until done.
    fn play(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let source = SamplesBuffer::new(1, sample_rate, samples.to_vec());
        self.sink.append(source);
        self.sink.sleep_until_end();
        Ok(())
    }
}

// Safety: the sink is only used from the orchestration task; the handle is
// held to keep the device open. We never touch it from another thread.
unsafe impl Send for OutputDevice {}
unsafe impl Sync for OutputDevice {}
